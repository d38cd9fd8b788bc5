//! Policy validation engine for extracted invoices
//!
//! Rules-based verification before confirmation.
//! Pure and deterministic: no I/O, same input yields same output.

use crate::models::InvoiceRecord;
use chrono::{NaiveDate, Utc};
use tracing::debug;

const MEAL_LIMIT: f64 = 200.0;
const MAX_INVOICE_AGE_DAYS: i64 = 30;

/// Trait for a single policy rule, checked per non-error invoice
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Violation messages for one invoice (without the position prefix)
    fn check(&self, invoice: &InvoiceRecord, today: NaiveDate) -> Vec<String>;
}

/// Policy validator that enforces rules over a batch of invoices
pub struct PolicyValidator {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl PolicyValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
    }

    /// Validate a batch against today's date
    pub fn validate(&self, invoices: &[InvoiceRecord]) -> Vec<String> {
        self.validate_at(invoices, Utc::now().date_naive())
    }

    /// Validate a batch against an explicit date. Violations follow invoice
    /// order, then rule order within an invoice, each prefixed with the
    /// 1-based invoice position. An empty result means the batch passes.
    pub fn validate_at(&self, invoices: &[InvoiceRecord], today: NaiveDate) -> Vec<String> {
        let mut violations = Vec::new();

        for (idx, invoice) in invoices.iter().enumerate() {
            let position = idx + 1;

            // Error records are inert: report the failure, skip the rules
            if invoice.is_parse_failure() {
                violations.push(format!("Invoice {}: Failed to parse invoice data", position));
                continue;
            }

            for rule in &self.rules {
                for message in rule.check(invoice, today) {
                    violations.push(format!("Invoice {}: {}", position, message));
                }
            }
        }

        debug!(
            invoice_count = invoices.len(),
            violation_count = violations.len(),
            "Policy validation completed"
        );

        violations
    }
}

impl Default for PolicyValidator {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Standard Rules =================
//

/// Rule: meal expenses must not exceed the limit
pub struct MealCapRule;

impl PolicyRule for MealCapRule {
    fn name(&self) -> &'static str {
        "meal_expense_cap"
    }

    fn check(&self, invoice: &InvoiceRecord, _today: NaiveDate) -> Vec<String> {
        let items = invoice.items.to_lowercase();
        let vendor = invoice.vendor_name.to_lowercase();

        let is_meal = items.contains("meal")
            || items.contains("restaurant")
            || vendor.contains("meal")
            || vendor.contains("restaurant");

        if is_meal && invoice.total_amount > MEAL_LIMIT {
            vec![format!(
                "Meal expense {:.2} exceeds the {:.0} limit",
                invoice.total_amount, MEAL_LIMIT
            )]
        } else {
            Vec::new()
        }
    }
}

/// Rule: invoices must be dated within the allowed window
pub struct StalenessRule;

impl PolicyRule for StalenessRule {
    fn name(&self) -> &'static str {
        "invoice_staleness"
    }

    fn check(&self, invoice: &InvoiceRecord, today: NaiveDate) -> Vec<String> {
        // A missing date is the required-fields rule's concern, not a
        // malformed one.
        if invoice.invoice_date.trim().is_empty() {
            return Vec::new();
        }

        match NaiveDate::parse_from_str(&invoice.invoice_date, "%Y-%m-%d") {
            Ok(date) => {
                let days_old = (today - date).num_days();
                if days_old > MAX_INVOICE_AGE_DAYS {
                    vec![format!(
                        "Invoice is {} days old, exceeds {}-day policy",
                        days_old, MAX_INVOICE_AGE_DAYS
                    )]
                } else {
                    Vec::new()
                }
            }
            Err(_) => vec!["Invalid invoice date format".to_string()],
        }
    }
}

/// Rule: required fields must be present and non-zero
pub struct RequiredFieldsRule;

impl PolicyRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "required_fields"
    }

    fn check(&self, invoice: &InvoiceRecord, _today: NaiveDate) -> Vec<String> {
        let mut missing = Vec::new();

        if invoice.tax_id.trim().is_empty() {
            missing.push("tax_id");
        }
        if invoice.company_name.trim().is_empty() {
            missing.push("company_name");
        }
        if invoice.vendor_name.trim().is_empty() {
            missing.push("vendor_name");
        }
        if invoice.total_amount == 0.0 {
            missing.push("total_amount");
        }

        missing
            .into_iter()
            .map(|field| format!("Missing required field: {}", field))
            .collect()
    }
}

/// Create a validator with the standard company policy rules
pub fn create_default_policy_validator() -> PolicyValidator {
    let mut validator = PolicyValidator::new();
    validator.add_rule(Box::new(MealCapRule));
    validator.add_rule(Box::new(StalenessRule));
    validator.add_rule(Box::new(RequiredFieldsRule));
    validator
}

//
// ================= Tests =================
//
