//! Row helpers shared by the event and catalogue repositories.
//!
//! Labels (tags, products) and attribute bags live in child tables keyed by
//! the owning record's uuid; these helpers rewrite and load them.

use crate::model::value::{AttrValue, Attributes};
use crate::repo::error::{RepoError, RepoResult};
use log::warn;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Child table holding rows owned by one parent record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OwnedTable {
    pub table: &'static str,
    pub owner_column: &'static str,
}

pub(crate) const EVENT_TAGS: OwnedTable = OwnedTable {
    table: "event_tags",
    owner_column: "event_uuid",
};
pub(crate) const EVENT_PRODUCTS: OwnedTable = OwnedTable {
    table: "event_products",
    owner_column: "event_uuid",
};
pub(crate) const EVENT_ATTRIBUTES: OwnedTable = OwnedTable {
    table: "event_attributes",
    owner_column: "event_uuid",
};
pub(crate) const CATALOGUE_TAGS: OwnedTable = OwnedTable {
    table: "catalogue_tags",
    owner_column: "catalogue_uuid",
};
pub(crate) const CATALOGUE_ATTRIBUTES: OwnedTable = OwnedTable {
    table: "catalogue_attributes",
    owner_column: "catalogue_uuid",
};

/// Runs `work` inside a savepoint so a multi-statement write is applied
/// entirely or not at all, with or without an enclosing transaction.
pub(crate) fn atomically<T>(
    conn: &Connection,
    work: impl FnOnce() -> RepoResult<T>,
) -> RepoResult<T> {
    conn.execute_batch("SAVEPOINT evcat_write;")?;
    match work() {
        Ok(value) => {
            conn.execute_batch("RELEASE evcat_write;")?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) =
                conn.execute_batch("ROLLBACK TO evcat_write; RELEASE evcat_write;")
            {
                warn!(
                    "event=savepoint_rollback module=repo status=error error={rollback_err}"
                );
            }
            Err(err)
        }
    }
}

pub(crate) fn write_labels(
    conn: &Connection,
    target: OwnedTable,
    owner: &str,
    labels: &BTreeSet<String>,
) -> RepoResult<()> {
    let OwnedTable {
        table,
        owner_column,
    } = target;
    conn.execute(
        &format!("DELETE FROM {table} WHERE {owner_column} = ?1;"),
        [owner],
    )?;

    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {table} ({owner_column}, name) VALUES (?1, ?2);"
    ))?;
    for label in labels {
        stmt.execute(params![owner, label.as_str()])?;
    }
    Ok(())
}

pub(crate) fn load_labels(
    conn: &Connection,
    target: OwnedTable,
    owner: &str,
) -> RepoResult<BTreeSet<String>> {
    let OwnedTable {
        table,
        owner_column,
    } = target;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT name FROM {table} WHERE {owner_column} = ?1 ORDER BY name ASC;"
    ))?;
    let labels = stmt
        .query_map([owner], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(labels)
}

pub(crate) fn write_attributes(
    conn: &Connection,
    target: OwnedTable,
    owner: &str,
    attributes: &Attributes,
) -> RepoResult<()> {
    let OwnedTable {
        table,
        owner_column,
    } = target;
    conn.execute(
        &format!("DELETE FROM {table} WHERE {owner_column} = ?1;"),
        [owner],
    )?;

    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {table} (
            {owner_column},
            key,
            value_type,
            int_value,
            real_value,
            text_value
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);"
    ))?;
    for (key, value) in attributes {
        let (int_value, real_value, text_value) = attribute_columns(value);
        stmt.execute(params![
            owner,
            key.as_str(),
            value.type_name(),
            int_value,
            real_value,
            text_value,
        ])?;
    }
    Ok(())
}

pub(crate) fn load_attributes(
    conn: &Connection,
    target: OwnedTable,
    owner: &str,
) -> RepoResult<Attributes> {
    let OwnedTable {
        table,
        owner_column,
    } = target;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT key, value_type, int_value, real_value, text_value
         FROM {table}
         WHERE {owner_column} = ?1;"
    ))?;
    let mut rows = stmt.query([owner])?;
    let mut attributes = Attributes::new();
    while let Some(row) = rows.next()? {
        let key: String = row.get(0)?;
        let value_type: String = row.get(1)?;
        let value = decode_attribute(
            table,
            &value_type,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        )?;
        attributes.insert(key, value);
    }
    Ok(attributes)
}

fn attribute_columns(value: &AttrValue) -> (Option<i64>, Option<f64>, Option<&str>) {
    match value {
        AttrValue::Null => (None, None, None),
        AttrValue::Bool(value) => (Some(bool_to_int(*value)), None, None),
        AttrValue::Integer(value) | AttrValue::Timestamp(value) => (Some(*value), None, None),
        AttrValue::Float(value) => (None, Some(*value), None),
        AttrValue::Text(value) => (None, None, Some(value.as_str())),
    }
}

fn decode_attribute(
    table: &str,
    value_type: &str,
    int_value: Option<i64>,
    real_value: Option<f64>,
    text_value: Option<String>,
) -> RepoResult<AttrValue> {
    let missing = || {
        RepoError::InvalidData(format!(
            "attribute of type `{value_type}` in {table} has no value"
        ))
    };
    let value = match value_type {
        "null" => AttrValue::Null,
        "bool" => AttrValue::Bool(int_to_bool(int_value.ok_or_else(missing)?, table)?),
        "integer" => AttrValue::Integer(int_value.ok_or_else(missing)?),
        "timestamp" => AttrValue::Timestamp(int_value.ok_or_else(missing)?),
        "float" => AttrValue::Float(real_value.ok_or_else(missing)?),
        "text" => AttrValue::Text(text_value.ok_or_else(missing)?),
        other => {
            return Err(RepoError::InvalidData(format!(
                "unknown attribute type `{other}` in {table}.value_type"
            )));
        }
    };
    Ok(value)
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}
