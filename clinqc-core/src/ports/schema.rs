// clinqc-core/src/ports/schema.rs

// The core never infers the data schema on its own: the surrounding
// application owns it and exposes it through this capability.

use crate::domain::schema::FieldType;

pub trait FieldResolver: Send + Sync {
    fn resolve_field(&self, name: &str) -> Option<FieldType>;

    /// Whether a visit code referenced as `field@VISIT` is declared.
    fn knows_visit(&self, visit: &str) -> bool;
}
