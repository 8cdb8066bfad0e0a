//! Column descriptor model of the host engine's input/output columns.
//!
//! The aggregation functions take exactly one binary column carrying
//! serialized sketches, so validation boils down to checking the argument
//! count, the category, and the primitive type. Everything here is checked
//! before any row is seen.

use crate::error::{Result, UdafError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Boolean,
    Int,
    BigInt,
    Float,
    Double,
    Text,
    Binary,
}

impl PrimitiveType {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Int => "int",
            PrimitiveType::BigInt => "bigint",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Text => "text",
            PrimitiveType::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnCategory {
    Primitive,
    Struct,
    List,
    Map,
}

impl ColumnCategory {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnCategory::Primitive => "primitive",
            ColumnCategory::Struct => "struct",
            ColumnCategory::List => "list",
            ColumnCategory::Map => "map",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDescriptor {
    Primitive(PrimitiveType),
    Struct,
    List,
    Map,
}

impl ColumnDescriptor {
    pub fn category(&self) -> ColumnCategory {
        match self {
            ColumnDescriptor::Primitive(_) => ColumnCategory::Primitive,
            ColumnDescriptor::Struct => ColumnCategory::Struct,
            ColumnDescriptor::List => ColumnCategory::List,
            ColumnDescriptor::Map => ColumnCategory::Map,
        }
    }
}

/// check_single_binary enforces the one-binary-column signature shared by
/// both aggregation families.
pub fn check_single_binary(args: &[ColumnDescriptor]) -> Result<()> {
    if args.len() != 1 {
        return Err(UdafError::Argument(format!(
            "exactly one argument expected, got {}",
            args.len()
        )));
    }
    match args[0] {
        ColumnDescriptor::Primitive(PrimitiveType::Binary) => Ok(()),
        ColumnDescriptor::Primitive(ty) => Err(UdafError::Argument(format!(
            "binary column expected, got primitive type {}",
            ty.name()
        ))),
        other => Err(UdafError::Argument(format!(
            "binary column expected, got category {}",
            other.category().name()
        ))),
    }
}
