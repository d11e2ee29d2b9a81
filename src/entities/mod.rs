use serde::{Deserialize, Serialize};

pub mod debt_entry;
pub mod equipment;
pub mod lab_item;
pub mod liquid_material;
pub mod loan_request;
pub mod request_line;
pub mod solid_material;
pub mod stock_movement;

/// One of the four material categories, each backed by its own stock table
/// with its own stock column name. All ledger logic dispatches through this
/// lookup instead of being duplicated per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum MaterialCategory {
    Liquid,
    Solid,
    Equipment,
    LabItem,
}

impl MaterialCategory {
    pub const ALL: [MaterialCategory; 4] = [
        MaterialCategory::Liquid,
        MaterialCategory::Solid,
        MaterialCategory::Equipment,
        MaterialCategory::LabItem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialCategory::Liquid => "liquid",
            MaterialCategory::Solid => "solid",
            MaterialCategory::Equipment => "equipment",
            MaterialCategory::LabItem => "lab-item",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "liquid" => Some(MaterialCategory::Liquid),
            "solid" => Some(MaterialCategory::Solid),
            "equipment" => Some(MaterialCategory::Equipment),
            "lab-item" => Some(MaterialCategory::LabItem),
            _ => None,
        }
    }

    /// Stock table backing this category.
    pub fn table(&self) -> &'static str {
        match self {
            MaterialCategory::Liquid => "liquid_materials",
            MaterialCategory::Solid => "solid_materials",
            MaterialCategory::Equipment => "equipment",
            MaterialCategory::LabItem => "lab_items",
        }
    }

    /// Name of the on-hand quantity column in this category's table.
    pub fn stock_column(&self) -> &'static str {
        match self {
            MaterialCategory::Liquid => "available_milliliters",
            MaterialCategory::Solid => "available_grams",
            MaterialCategory::Equipment => "units_on_hand",
            MaterialCategory::LabItem => "stock_count",
        }
    }
}

impl std::fmt::Display for MaterialCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A material identified by category and row id within that category's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MaterialRef {
    pub category: MaterialCategory,
    pub id: i64,
}

impl MaterialRef {
    pub fn new(category: MaterialCategory, id: i64) -> Self {
        Self { category, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trip() {
        for cat in MaterialCategory::ALL {
            assert_eq!(MaterialCategory::from_str(cat.as_str()), Some(cat));
        }
        assert_eq!(MaterialCategory::from_str("gas"), None);
    }

    #[test]
    fn category_lookup_is_distinct_per_store() {
        let tables: std::collections::HashSet<_> =
            MaterialCategory::ALL.iter().map(|c| c.table()).collect();
        assert_eq!(tables.len(), 4);
        let columns: std::collections::HashSet<_> = MaterialCategory::ALL
            .iter()
            .map(|c| c.stock_column())
            .collect();
        assert_eq!(columns.len(), 4);
    }
}
