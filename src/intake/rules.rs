//! Pre-extraction rules engine for fast pattern matching.
//!
//! Runs before the intent-extraction call to short-circuit obvious
//! non-requests:
//! - noreply / mailer-daemon senders → drop
//! - auto-reply / out-of-office subjects → drop
//! - unsubscribe-footer marketing mail → drop
//!
//! It also pulls an order-number hint out of the text with a regex, which
//! the processor uses to cross-check (or fill in) the extractor's answer.

use regex::Regex;
use tracing::debug;

use crate::intake::types::InboundEmail;

/// Which field a rule matches against.
#[derive(Debug, Clone)]
pub enum RuleField {
    Sender,
    Subject,
    Body,
}

/// A single drop rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct DropRule {
    /// Human-readable pattern description.
    pub pattern: String,
    pub regex: Regex,
    pub field: RuleField,
    /// Why this rule triggers.
    pub reason: String,
}

/// Fast-path rules applied before the extractor.
pub struct IntakeRules {
    drop_rules: Vec<DropRule>,
    order_number: Regex,
}

impl IntakeRules {
    /// Create a rules engine with the default drop patterns.
    pub fn default_rules() -> Self {
        let drop_rules = vec![
            DropRule {
                pattern: "noreply@*".into(),
                regex: Regex::new(r"(?i)^no[\-_.]?reply@").unwrap(),
                field: RuleField::Sender,
                reason: "noreply sender".into(),
            },
            DropRule {
                pattern: "mailer-daemon".into(),
                regex: Regex::new(r"(?i)^(mailer[\-_]?daemon|postmaster)@").unwrap(),
                field: RuleField::Sender,
                reason: "automated mail system".into(),
            },
            DropRule {
                pattern: "auto-reply subject".into(),
                regex: Regex::new(r"(?i)\b(auto[\- ]?reply|automatic reply|out of office)\b")
                    .unwrap(),
                field: RuleField::Subject,
                reason: "auto-reply / out-of-office".into(),
            },
            DropRule {
                pattern: "unsubscribe footer".into(),
                regex: Regex::new(
                    r"(?i)(click here to unsubscribe|manage your subscription|email preferences|opt[- ]?out)",
                )
                .unwrap(),
                field: RuleField::Body,
                reason: "bulk/marketing email".into(),
            },
        ];

        Self {
            drop_rules,
            order_number: Regex::new(
                r"(?i)\border\s*(?:number|no\.?)?\s*[:#\-]?\s*(?:is\s+)?#?([A-Z]{2,5}-?\d{3,12})\b",
            )
            .unwrap(),
        }
    }

    /// Create an empty rules engine (for testing).
    pub fn empty() -> Self {
        Self {
            drop_rules: Vec::new(),
            order_number: Regex::new(r"(?i)\border\s*#?([A-Z]{2,5}-?\d{3,12})").unwrap(),
        }
    }

    /// Add a custom drop rule.
    pub fn add_drop_rule(
        &mut self,
        pattern: &str,
        field: RuleField,
        reason: &str,
    ) -> Result<(), regex::Error> {
        self.drop_rules.push(DropRule {
            pattern: pattern.into(),
            regex: Regex::new(pattern)?,
            field,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Evaluate an email against the drop rules.
    ///
    /// Returns `Some(reason)` if the email should be dropped without ever
    /// reaching the extractor; `None` to continue.
    pub fn should_drop(&self, email: &InboundEmail) -> Option<String> {
        for rule in &self.drop_rules {
            let field_value = match rule.field {
                RuleField::Sender => &email.sender,
                RuleField::Subject => {
                    if let Some(ref subject) = email.subject {
                        subject
                    } else {
                        continue;
                    }
                }
                RuleField::Body => &email.body,
            };

            if rule.regex.is_match(field_value) {
                debug!(
                    sender = %email.sender,
                    rule = %rule.pattern,
                    reason = %rule.reason,
                    "Email matched drop rule"
                );
                return Some(rule.reason.clone());
            }
        }
        None
    }

    /// Pull an order-number hint out of the subject or body.
    pub fn order_number_hint(&self, email: &InboundEmail) -> Option<String> {
        let capture = |text: &str| {
            self.order_number
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_uppercase())
        };
        email
            .subject
            .as_deref()
            .and_then(capture)
            .or_else(|| capture(&email.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_email(sender: &str, subject: Option<&str>, body: &str) -> InboundEmail {
        InboundEmail {
            message_id: "test-1".into(),
            sender: sender.into(),
            sender_name: None,
            subject: subject.map(String::from),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn drops_noreply() {
        let rules = IntakeRules::default_rules();
        let email = make_email("noreply@shop.example", Some("Your order"), "hi");
        assert!(rules.should_drop(&email).is_some());
    }

    #[test]
    fn drops_out_of_office() {
        let rules = IntakeRules::default_rules();
        let email = make_email(
            "jane@example.com",
            Some("Automatic reply: Re: your order"),
            "I am away until Monday",
        );
        assert!(rules.should_drop(&email).is_some());
    }

    #[test]
    fn drops_unsubscribe_footer() {
        let rules = IntakeRules::default_rules();
        let email = make_email(
            "deals@brand.example",
            Some("Big sale"),
            "50% off!\n\nClick here to unsubscribe from these emails.",
        );
        assert!(rules.should_drop(&email).is_some());
    }

    #[test]
    fn passes_through_customer_request() {
        let rules = IntakeRules::default_rules();
        let email = make_email(
            "jane@example.com",
            Some("Cancel order ORD-1234"),
            "Hi, please cancel order #ORD-1234. Thanks!",
        );
        assert!(rules.should_drop(&email).is_none());
    }

    #[test]
    fn custom_drop_rule() {
        let mut rules = IntakeRules::empty();
        rules
            .add_drop_rule(r"(?i)@spam\.org", RuleField::Sender, "custom spam")
            .unwrap();
        let email = make_email("anyone@spam.org", None, "hello");
        assert_eq!(rules.should_drop(&email).as_deref(), Some("custom spam"));
    }

    #[test]
    fn order_hint_from_subject() {
        let rules = IntakeRules::default_rules();
        let email = make_email("jane@example.com", Some("Order #ORD-9876"), "please help");
        assert_eq!(rules.order_number_hint(&email).as_deref(), Some("ORD-9876"));
    }

    #[test]
    fn order_hint_from_body_variants() {
        let rules = IntakeRules::default_rules();
        for body in [
            "my order number is ORD-4521",
            "about Order no. ORD-4521",
            "order: ord-4521 needs a new address",
            "order #ORD-4521",
        ] {
            let email = make_email("jane@example.com", None, body);
            assert_eq!(
                rules.order_number_hint(&email).as_deref(),
                Some("ORD-4521"),
                "{body}"
            );
        }
    }

    #[test]
    fn no_hint_when_absent() {
        let rules = IntakeRules::default_rules();
        let email = make_email("jane@example.com", None, "where is my stuff?");
        assert!(rules.order_number_hint(&email).is_none());
    }
}
