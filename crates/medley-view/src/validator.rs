//! Pluggable schema validation hook.

use medley_log::EntryPayload;

/// Validates a payload before it may affect the view.
///
/// An empty result means the payload is acceptable. A rejected entry stays
/// in its log for audit but is never applied.
pub trait SchemaValidator: Send + Sync {
    /// Return validation errors for `payload`.
    fn validate(&self, payload: &EntryPayload) -> Vec<String>;
}

/// Validator that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SchemaValidator for AcceptAll {
    fn validate(&self, _payload: &EntryPayload) -> Vec<String> {
        Vec::new()
    }
}

impl<F> SchemaValidator for F
where
    F: Fn(&EntryPayload) -> Vec<String> + Send + Sync,
{
    fn validate(&self, payload: &EntryPayload) -> Vec<String> {
        self(payload)
    }
}
