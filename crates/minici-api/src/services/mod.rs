//! Services behind the HTTP surface.

pub mod intake;
pub mod notifier;

pub use intake::{IntakeOutcome, WebhookIntake};
pub use notifier::LogNotifier;
