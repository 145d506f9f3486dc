//! Target table definitions.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Result, SyncError};

/// Logical column type, mapped to a native type per dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Int64,
    Int32,
    Float64,
    Bool,
    String,
    DateTime,
    Date,
    /// Fixed-point money amount, scale 4.
    Decimal,
}

impl LogicalType {
    /// Whether absent values fill with a numeric zero (or `false`).
    pub fn is_numeric_or_bool(&self) -> bool {
        matches!(
            self,
            LogicalType::Int64
                | LogicalType::Int32
                | LogicalType::Float64
                | LogicalType::Bool
                | LogicalType::Decimal
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            LogicalType::Int64 => "int64",
            LogicalType::Int32 => "int32",
            LogicalType::Float64 => "float64",
            LogicalType::Bool => "bool",
            LogicalType::String => "string",
            LogicalType::DateTime => "datetime",
            LogicalType::Date => "date",
            LogicalType::Decimal => "decimal",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of every table the engine knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableId {
    Orders,
    OrderPrices,
    Customers,
    LineItems,
    Refunds,
    RefundLineItem,
    Adjustments,
    ShipLines,
    DiscountCodes,
    DiscountApps,
    OrderAttr,
    Products,
    Variants,
    ProductOptions,
    InventoryLevels,
    InventoryLocations,
    DateDimension,
}

impl TableId {
    pub const ALL: [TableId; 17] = [
        TableId::Orders,
        TableId::OrderPrices,
        TableId::Customers,
        TableId::LineItems,
        TableId::Refunds,
        TableId::RefundLineItem,
        TableId::Adjustments,
        TableId::ShipLines,
        TableId::DiscountCodes,
        TableId::DiscountApps,
        TableId::OrderAttr,
        TableId::Products,
        TableId::Variants,
        TableId::ProductOptions,
        TableId::InventoryLevels,
        TableId::InventoryLocations,
        TableId::DateDimension,
    ];

    /// Target table name.
    pub fn name(&self) -> &'static str {
        match self {
            TableId::Orders => "orders",
            TableId::OrderPrices => "order_prices",
            TableId::Customers => "customers",
            TableId::LineItems => "line_items",
            TableId::Refunds => "refunds",
            TableId::RefundLineItem => "refund_line_item",
            TableId::Adjustments => "adjustments",
            TableId::ShipLines => "ship_lines",
            TableId::DiscountCodes => "discount_codes",
            TableId::DiscountApps => "discount_apps",
            TableId::OrderAttr => "order_attr",
            TableId::Products => "products",
            TableId::Variants => "variants",
            TableId::ProductOptions => "product_options",
            TableId::InventoryLevels => "inventory_levels",
            TableId::InventoryLocations => "inventory_locations",
            TableId::DateDimension => "date_dimension",
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TableId {
    type Err = SyncError;

    /// Accepts `line_items`, `LineItems` and `lineitems` alike.
    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        TableId::ALL
            .into_iter()
            .find(|id| id.name().replace('_', "") == folded)
            .ok_or_else(|| SyncError::UnknownTable(s.to_string()))
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
    /// Character limit for string columns; `None` is unbounded text.
    pub max_length: Option<u32>,
}

impl ColumnDef {
    /// A non-nullable column.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: false,
            max_length: None,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }
}

/// Definition of one target table: ordered columns and primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub id: TableId,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(id: TableId) -> Self {
        Self {
            id,
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Target table name.
    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Positions of `names` in column order, failing on any unknown name.
    pub fn positions(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                self.column_index(n).ok_or_else(|| {
                    SyncError::invalid_schema(self.name(), format!("no column named '{}'", n))
                })
            })
            .collect()
    }

    /// Check internal consistency: unique column names and a primary key
    /// drawn from the columns.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(SyncError::invalid_schema(self.name(), "no columns"));
        }
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(SyncError::invalid_schema(
                    self.name(),
                    format!("duplicate column '{}'", col.name),
                ));
            }
        }
        if self.primary_key.is_empty() {
            return Err(SyncError::invalid_schema(self.name(), "no primary key"));
        }
        for idx in self.positions(&self.primary_key)? {
            if self.columns[idx].nullable {
                return Err(SyncError::invalid_schema(
                    self.name(),
                    format!("primary key column '{}' is nullable", self.columns[idx].name),
                ));
            }
        }
        Ok(())
    }
}
