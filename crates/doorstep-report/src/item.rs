//! Locations within a data file that issues point at.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Kind of location within tabular data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabularItemType {
    Cell,
    Row,
    Column,
    Table,
    Sheet,
    Global,
}

impl TabularItemType {
    /// Derive the item type from which coordinates are present.
    pub fn from_coordinates(row: Option<u64>, column: Option<u64>) -> Self {
        match (row, column) {
            (Some(_), Some(_)) => TabularItemType::Cell,
            (Some(_), None) => TabularItemType::Row,
            (None, Some(_)) => TabularItemType::Column,
            (None, None) => TabularItemType::Global,
        }
    }
}

impl fmt::Display for TabularItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TabularItemType::Cell => "Cell",
            TabularItemType::Row => "Row",
            TabularItemType::Column => "Column",
            TabularItemType::Table => "Table",
            TabularItemType::Sheet => "Sheet",
            TabularItemType::Global => "Global",
        };
        f.write_str(name)
    }
}

/// What an item refers to: its type, where it is, and the raw value there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub location: Value,
    #[serde(default)]
    pub definition: Value,
}

/// A located item, rendered as `{"entity": {...}, "properties": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocatedItem {
    pub entity: Option<Entity>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

/// The subject of an issue.
///
/// Processors normally attach a [`LocatedItem`]; anything else they pass is
/// carried through verbatim as a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Item {
    Located(LocatedItem),
    Literal(Value),
}

impl Item {
    /// Build a located item.
    pub fn new(
        entity_type: impl Into<String>,
        location: Value,
        definition: Value,
        properties: Option<Map<String, Value>>,
    ) -> Self {
        Item::Located(LocatedItem {
            entity: Some(Entity {
                entity_type: Some(entity_type.into()),
                location,
                definition,
            }),
            properties,
        })
    }

    /// Item with no entity, carrying only properties.
    pub fn properties_only(properties: Map<String, Value>) -> Self {
        Item::Located(LocatedItem {
            entity: None,
            properties: Some(properties),
        })
    }

    /// An opaque literal (including `null`).
    pub fn literal(value: Value) -> Self {
        Item::Literal(value)
    }

    /// Tabular item whose type follows from the coordinates given.
    ///
    /// `row_values` are the values of the row the issue was found on.
    pub fn tabular(
        row: Option<u64>,
        column: Option<u64>,
        row_values: Option<Map<String, Value>>,
    ) -> Self {
        Self::tabular_of(
            TabularItemType::from_coordinates(row, column),
            row,
            column,
            row_values,
        )
    }

    /// Tabular item with an explicit type (e.g. `Table` or `Sheet`).
    pub fn tabular_of(
        item_type: TabularItemType,
        row: Option<u64>,
        column: Option<u64>,
        properties: Option<Map<String, Value>>,
    ) -> Self {
        Self::new(
            item_type.to_string(),
            json!({ "row": row, "column": column }),
            Value::Null,
            properties,
        )
    }

    /// Geospatial item: one feature of a collection.
    pub fn feature(
        entity_type: impl Into<String>,
        index: u64,
        definition: Value,
        properties: Option<Map<String, Value>>,
    ) -> Self {
        Self::new(entity_type, json!({ "index": index }), definition, properties)
    }

    /// Entity of a located item.
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Item::Located(item) => item.entity.as_ref(),
            Item::Literal(_) => None,
        }
    }

    /// Location of a located item, if it has one.
    pub fn location(&self) -> Option<&Value> {
        self.entity().map(|e| &e.location)
    }

    /// Entity type string, if any.
    pub fn entity_type(&self) -> Option<&str> {
        self.entity().and_then(|e| e.entity_type.as_deref())
    }

    /// Properties attached to a located item.
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        match self {
            Item::Located(item) => item.properties.as_ref(),
            Item::Literal(_) => None,
        }
    }
}

impl Default for Item {
    fn default() -> Self {
        Item::Literal(Value::Null)
    }
}
