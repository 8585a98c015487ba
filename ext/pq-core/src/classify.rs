//! Column classification into the parallel (regular) and sequential
//! (special) transfer paths

use ahash::AHashSet;
use arrow_schema::Schema;
use indexmap::IndexMap;

use crate::logger::Logger;
use crate::store::RowStore;
use crate::types::{export_physical_type, PhysicalType, StoreType};
use crate::{Result, TransposeError};

/// One column of a call, bound to its store variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Position of the column in the batch
    pub position: usize,
    /// 1-based store variable index
    pub store_index: usize,
    pub physical_type: PhysicalType,
    pub is_special: bool,
}

/// Import columns split by transfer path
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub regular: Vec<ColumnDescriptor>,
    pub special: Vec<ColumnDescriptor>,
    /// Mapped columns whose Arrow type has no handler
    pub skipped: Vec<String>,
}

pub(crate) fn name_set(names: &[String]) -> AHashSet<&str> {
    names.iter().map(String::as_str).collect()
}

fn check_store_index(name: &str, index: usize, variable_count: usize) -> Result<()> {
    if index == 0 || index > variable_count {
        return Err(TransposeError::invalid_argument(format!(
            "column '{}' maps to store variable {}, but the store has {} variables",
            name, index, variable_count
        )));
    }
    Ok(())
}

/// Classify the fields of an incoming batch.
///
/// Fields absent from `column_map` are dropped. Binary fields always take the
/// special path since only the sequential binary write can store them.
pub fn classify_import(
    schema: &Schema,
    column_map: &IndexMap<String, usize>,
    special: &AHashSet<&str>,
    variable_count: usize,
    logger: &Logger,
) -> Result<ImportPlan> {
    let mut plan = ImportPlan::default();

    for (position, field) in schema.fields().iter().enumerate() {
        let name = field.name();
        let Some(&store_index) = column_map.get(name) else {
            continue;
        };
        check_store_index(name, store_index, variable_count)?;

        let Some(physical_type) = PhysicalType::from_data_type(field.data_type()) else {
            logger.debug(|| {
                format!(
                    "Skipping column '{}': no import handler for {}",
                    name,
                    field.data_type()
                )
            });
            plan.skipped.push(name.clone());
            continue;
        };

        let is_special = special.contains(name.as_str()) || physical_type.is_binary();
        let descriptor = ColumnDescriptor {
            name: name.clone(),
            position,
            store_index,
            physical_type,
            is_special,
        };
        if is_special {
            plan.special.push(descriptor);
        } else {
            plan.regular.push(descriptor);
        }
    }

    logger.debug(|| {
        format!(
            "Import plan: {} regular, {} special, {} skipped",
            plan.regular.len(),
            plan.special.len(),
            plan.skipped.len()
        )
    });
    Ok(plan)
}

/// A store variable requested for export, before binary classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportColumn {
    pub name: String,
    pub store_index: usize,
    pub store_type: StoreType,
    pub is_special: bool,
}

impl ExportColumn {
    /// Bind to a batch position once the binary decision is known
    pub fn descriptor(&self, position: usize, binary: bool) -> ColumnDescriptor {
        ColumnDescriptor {
            name: self.name.clone(),
            position,
            store_index: self.store_index,
            physical_type: export_physical_type(self.store_type, binary),
            is_special: self.is_special,
        }
    }
}

/// Resolve export column names against the store.
///
/// Long-text variables always take the special path.
pub fn classify_export<S: RowStore + ?Sized>(
    store: &S,
    columns: &[String],
    special: &AHashSet<&str>,
) -> Result<Vec<ExportColumn>> {
    let mut seen = AHashSet::with_capacity(columns.len());
    columns
        .iter()
        .map(|name| {
            if !seen.insert(name.as_str()) {
                return Err(TransposeError::invalid_argument(format!(
                    "column '{}' requested more than once",
                    name
                )));
            }
            let store_index = store
                .variable_index(name)
                .ok_or_else(|| TransposeError::unknown_column(name.as_str()))?;
            let store_type = store.store_type(store_index)?;
            Ok(ExportColumn {
                name: name.clone(),
                store_index,
                store_type,
                is_special: special.contains(name.as_str()) || store_type == StoreType::LongText,
            })
        })
        .collect()
}
