//! Typed projection of remote grid rows.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tabsync_core::{
    parse_cell_timestamp, Actor, FieldKind, FieldSchema, FieldValue, Row, DELETED_HEADER,
    ID_HEADER, UPDATED_AT_HEADER, VERSION_HEADER,
};

/// A row as represented in the remote store.
///
/// Ephemeral: rebuilt from the raw grid every sync cycle, never persisted
/// locally. `cells` holds every non-system column present remotely,
/// including columns outside the schema, so merges preserve them.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRow {
    /// Stable identifier shared with the local row.
    pub id: String,
    /// Raw cell strings keyed by remote header.
    pub cells: BTreeMap<String, String>,
    /// Remote-observed version counter, when present and parseable.
    pub version: Option<u64>,
    /// Remote-observed last-write timestamp, when present and parseable.
    pub updated_at: Option<DateTime<Utc>>,
    /// Remote tombstone marker.
    pub deleted: bool,
}

impl RemoteRow {
    /// Projects a local row into its remote representation.
    pub fn from_local(row: &Row, schema: &FieldSchema) -> Self {
        let cells = schema
            .fields()
            .iter()
            .map(|spec| (spec.remote_header.clone(), row.field(&spec.name).to_cell()))
            .collect();
        Self {
            id: row.id.clone(),
            cells,
            version: Some(row.version),
            updated_at: Some(row.updated_at),
            deleted: row.deleted,
        }
    }

    /// Decodes one raw grid row against the header row.
    ///
    /// Returns `None` when the identifier cell is blank: such rows are not
    /// part of the synchronized set.
    pub fn decode(headers: &[String], raw: &[String]) -> Option<Self> {
        let cell = |header: &str| -> &str {
            headers
                .iter()
                .position(|h| h == header)
                .and_then(|index| raw.get(index))
                .map(String::as_str)
                .unwrap_or("")
        };

        let id = cell(ID_HEADER).trim().to_string();
        if id.is_empty() {
            return None;
        }

        let version = cell(VERSION_HEADER).trim().parse::<u64>().ok();
        let updated_at = parse_cell_timestamp(cell(UPDATED_AT_HEADER));
        let deleted = matches!(
            FieldValue::from_cell(FieldKind::Bool, cell(DELETED_HEADER)),
            FieldValue::Bool(true)
        );

        let cells = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !FieldSchema::is_system_header(header))
            .map(|(index, header)| {
                let value = raw.get(index).cloned().unwrap_or_default();
                (header.clone(), value)
            })
            .collect();

        Some(Self {
            id,
            cells,
            version,
            updated_at,
            deleted,
        })
    }

    /// Renders this row as raw cells in the given header order.
    pub fn encode(&self, headers: &[String]) -> Vec<String> {
        headers
            .iter()
            .map(|header| match header.as_str() {
                ID_HEADER => self.id.clone(),
                VERSION_HEADER => self
                    .version
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                UPDATED_AT_HEADER => self
                    .updated_at
                    .map(|ts| FieldValue::Timestamp(ts).to_cell())
                    .unwrap_or_default(),
                DELETED_HEADER => {
                    if self.deleted {
                        "TRUE".to_string()
                    } else {
                        String::new()
                    }
                }
                other => self.cells.get(other).cloned().unwrap_or_default(),
            })
            .collect()
    }

    /// Returns the raw cell for a remote header, empty when absent.
    pub fn cell(&self, header: &str) -> &str {
        self.cells.get(header).map(String::as_str).unwrap_or("")
    }

    /// Coerces the cell for a schema field into a typed value.
    pub fn value(&self, schema: &FieldSchema, field_name: &str) -> FieldValue {
        match schema.field(field_name) {
            Some(spec) => FieldValue::from_cell(spec.kind, self.cell(&spec.remote_header)),
            None => FieldValue::Null,
        }
    }

    /// Materializes a typed local row from this remote copy.
    ///
    /// The produced row carries the remote version (1 when absent) and is
    /// meant to be handed to the catalog's muted `apply_remote` path, which
    /// stamps the push marker and the actor.
    pub fn to_row(&self, schema: &FieldSchema) -> Row {
        let fields = schema
            .fields()
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    FieldValue::from_cell(spec.kind, self.cell(&spec.remote_header)),
                )
            })
            .collect();
        let version = self.version.unwrap_or(1);
        Row {
            id: self.id.clone(),
            fields,
            version,
            last_pushed_version: version,
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
            updated_by: Actor::Remote,
            deleted: self.deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_core::inventory_schema;

    fn headers_for(schema: &FieldSchema) -> Vec<String> {
        schema.all_headers()
    }

    fn sample_local_row() -> Row {
        let mut row = Row::new("r1", BTreeMap::new());
        row.set_field("title", FieldValue::Text("Heriz".into()));
        row.set_field("quantity", FieldValue::Number(3.0));
        row.set_field("price", FieldValue::Number(1250.5));
        row
    }

    #[test]
    fn local_round_trip() {
        let schema = inventory_schema();
        let headers = headers_for(&schema);
        let row = sample_local_row();

        let remote = RemoteRow::from_local(&row, &schema);
        let raw = remote.encode(&headers);
        let decoded = RemoteRow::decode(&headers, &raw).unwrap();

        assert_eq!(decoded.id, "r1");
        assert_eq!(decoded.version, Some(1));
        assert_eq!(decoded.cell("Title"), "Heriz");
        assert_eq!(decoded.cell("Qty"), "3");
        assert_eq!(decoded.cell("Price"), "1250.5");
        assert!(!decoded.deleted);
    }

    #[test]
    fn blank_identifier_rows_are_skipped() {
        let schema = inventory_schema();
        let headers = headers_for(&schema);
        let raw = vec![String::new(); headers.len()];
        assert!(RemoteRow::decode(&headers, &raw).is_none());
    }

    #[test]
    fn malformed_version_reads_as_absent() {
        let schema = inventory_schema();
        let headers = headers_for(&schema);
        let mut raw = vec![String::new(); headers.len()];
        raw[0] = "r1".into();
        raw[1] = "not-a-number".into();

        let decoded = RemoteRow::decode(&headers, &raw).unwrap();
        assert_eq!(decoded.version, None);
    }

    #[test]
    fn tombstone_flag_is_case_insensitive() {
        let schema = inventory_schema();
        let headers = headers_for(&schema);
        let mut raw = vec![String::new(); headers.len()];
        raw[0] = "r1".into();
        raw[3] = "true".into();

        let decoded = RemoteRow::decode(&headers, &raw).unwrap();
        assert!(decoded.deleted);
    }

    #[test]
    fn extra_columns_survive_decode_and_encode() {
        let schema = inventory_schema();
        let mut headers = headers_for(&schema);
        headers.push("Warehouse".into());

        let mut raw = vec![String::new(); headers.len()];
        raw[0] = "r1".into();
        *raw.last_mut().unwrap() = "East".into();

        let decoded = RemoteRow::decode(&headers, &raw).unwrap();
        assert_eq!(decoded.cell("Warehouse"), "East");
        let encoded = decoded.encode(&headers);
        assert_eq!(encoded.last().unwrap(), "East");
    }

    #[test]
    fn to_row_coerces_typed_fields() {
        let schema = inventory_schema();
        let headers = headers_for(&schema);
        let mut local = sample_local_row();
        local.version = 7;
        local.updated_at = parse_cell_timestamp("2024-05-01T12:00:00Z").unwrap();

        let remote = RemoteRow::from_local(&local, &schema);
        let raw = remote.encode(&headers);
        let back = RemoteRow::decode(&headers, &raw).unwrap().to_row(&schema);

        assert_eq!(back.version, 7);
        assert_eq!(back.last_pushed_version, 7);
        assert_eq!(back.updated_by, Actor::Remote);
        assert_eq!(*back.field("quantity"), FieldValue::Number(3.0));
        assert_eq!(back.updated_at, local.updated_at);
    }
}
