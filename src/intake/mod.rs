//! Inbound-email intake — parsing, fast-path rules, intent extraction, and
//! workflow creation.

pub mod extractor;
pub mod processor;
pub mod rules;
pub mod types;

pub use extractor::{ExtractorConfig, HttpIntentExtractor};
pub use processor::{FULFILLMENT_METHOD_SETTING, IntakeOutcome, IntakeProcessor};
pub use rules::IntakeRules;
pub use types::{ExtractedIntent, InboundEmail, IntentExtractor, parse_mime};
