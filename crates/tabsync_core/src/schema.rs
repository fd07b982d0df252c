//! The explicit field mapping table.
//!
//! Every synchronized entity is described by a [`FieldSchema`]: an ordered
//! list of field specs naming the local field, the remote column header, and
//! the declared scalar kind. The engine is generic over the schema; the
//! shipped [`inventory_schema`] mirrors the inventory catalog this project
//! was built for.

use crate::value::FieldKind;

/// Remote header carrying the row identifier.
pub const ID_HEADER: &str = "Id";
/// Remote header carrying the row version counter.
pub const VERSION_HEADER: &str = "Version";
/// Remote header carrying the last-write timestamp.
pub const UPDATED_AT_HEADER: &str = "UpdatedAt";
/// Remote header carrying the tombstone marker.
pub const DELETED_HEADER: &str = "Deleted";

/// System headers present on every remote table, before the data columns.
const SYSTEM_HEADERS: [&str; 4] = [ID_HEADER, VERSION_HEADER, UPDATED_AT_HEADER, DELETED_HEADER];

/// One entry of the field mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Local field name.
    pub name: String,
    /// Remote column header.
    pub remote_header: String,
    /// Declared scalar kind, driving cell coercion.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Creates a field spec.
    pub fn new(
        name: impl Into<String>,
        remote_header: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        Self {
            name: name.into(),
            remote_header: remote_header.into(),
            kind,
        }
    }
}

/// An ordered field mapping table for one synchronized entity.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    /// Creates a schema from an ordered list of field specs.
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Returns the field specs in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Returns the number of data fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the schema has no data fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Looks up a field spec by local name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a field spec by remote header.
    pub fn field_for_header(&self, header: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.remote_header == header)
    }

    /// Returns the full remote header row: system headers followed by the
    /// data headers in declaration order.
    pub fn all_headers(&self) -> Vec<String> {
        SYSTEM_HEADERS
            .iter()
            .map(|h| (*h).to_string())
            .chain(self.fields.iter().map(|f| f.remote_header.clone()))
            .collect()
    }

    /// Returns true if `header` is one of the fixed system headers.
    pub fn is_system_header(header: &str) -> bool {
        SYSTEM_HEADERS.contains(&header)
    }
}

/// The inventory catalog schema shipped with this repository.
pub fn inventory_schema() -> FieldSchema {
    FieldSchema::new(vec![
        FieldSpec::new("item_no", "ItemNo", FieldKind::Text),
        FieldSpec::new("sku", "SKU", FieldKind::Text),
        FieldSpec::new("title", "Title", FieldKind::Text),
        FieldSpec::new("collection", "Collection", FieldKind::Text),
        FieldSpec::new("style", "Style", FieldKind::Text),
        FieldSpec::new("origin", "Origin", FieldKind::Text),
        FieldSpec::new("material", "Material", FieldKind::Text),
        FieldSpec::new("size", "Size", FieldKind::Text),
        FieldSpec::new("color", "Color", FieldKind::Text),
        FieldSpec::new("condition", "Condition", FieldKind::Text),
        FieldSpec::new("price", "Price", FieldKind::Number),
        FieldSpec::new("cost", "Cost", FieldKind::Number),
        FieldSpec::new("quantity", "Qty", FieldKind::Number),
        FieldSpec::new("location", "Location", FieldKind::Text),
        FieldSpec::new("status", "Status", FieldKind::Text),
        FieldSpec::new("notes", "Notes", FieldKind::Text),
    ])
}
