use bson::Bson;
use serde::{Deserialize, Serialize};

/// Declared type of a filter or update payload. Codes match the wire format
/// used by the bot's callers; `Any` (0) opts out of strict type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum DataType {
    Any,
    Int64,
    String,
    StringArray,
    Int,
    Int64Array,
    Uint64Array,
    Float64,
    Time,
    Bool,
}

impl DataType {
    /// Best-effort type of an untyped value, used by the typed constructors.
    #[must_use]
    pub fn of(value: &Bson) -> Self {
        match value {
            Bson::String(_) => Self::String,
            Bson::Int32(_) => Self::Int,
            Bson::Int64(_) => Self::Int64,
            Bson::Double(_) => Self::Float64,
            Bson::Boolean(_) => Self::Bool,
            Bson::DateTime(_) => Self::Time,
            Bson::Array(items) => Self::array_of(items),
            _ => Self::Any,
        }
    }

    /// Array code for a list payload, taken from its first element.
    #[must_use]
    pub fn array_of(items: &[Bson]) -> Self {
        match items.first() {
            Some(Bson::String(_)) => Self::StringArray,
            Some(Bson::Int64(_) | Bson::Int32(_)) => Self::Int64Array,
            _ => Self::Any,
        }
    }

    fn is_array(self) -> bool {
        matches!(self, Self::StringArray | Self::Int64Array | Self::Uint64Array)
    }

    /// Whether a single scalar is an acceptable value (or array element) for this type.
    #[must_use]
    pub fn admits(self, value: &Bson) -> bool {
        if let Bson::Array(items) = value
            && self.is_array()
        {
            return items.iter().all(|v| !matches!(v, Bson::Array(_)) && self.admits(v));
        }
        match self {
            Self::Any => true,
            Self::String | Self::StringArray => matches!(value, Bson::String(_)),
            Self::Int | Self::Int64 | Self::Int64Array => {
                matches!(value, Bson::Int32(_) | Bson::Int64(_))
            }
            Self::Uint64Array => match value {
                Bson::Int32(i) => *i >= 0,
                Bson::Int64(i) => *i >= 0,
                _ => false,
            },
            Self::Float64 => matches!(value, Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_)),
            Self::Time => matches!(value, Bson::DateTime(_)),
            Self::Bool => matches!(value, Bson::Boolean(_)),
        }
    }
}

impl TryFrom<u16> for DataType {
    type Error = String;
    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Any,
            1 => Self::Int64,
            2 => Self::String,
            3 => Self::StringArray,
            4 => Self::Int,
            5 => Self::Int64Array,
            6 => Self::Uint64Array,
            7 => Self::Float64,
            8 => Self::Time,
            9 => Self::Bool,
            other => return Err(format!("unknown data type code {other}")),
        })
    }
}

impl From<DataType> for u16 {
    fn from(t: DataType) -> Self {
        match t {
            DataType::Any => 0,
            DataType::Int64 => 1,
            DataType::String => 2,
            DataType::StringArray => 3,
            DataType::Int => 4,
            DataType::Int64Array => 5,
            DataType::Uint64Array => 6,
            DataType::Float64 => 7,
            DataType::Time => 8,
            DataType::Bool => 9,
        }
    }
}

/// Comparison operator of a `Filter`. Codes outside the known set decode to
/// `Unknown` and are handled according to the translator's operator policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum Operator {
    Equal,
    In,
    GreaterThanEqual,
    LessThanEqual,
    GreaterThan,
    Between,
    InArray,
    Or,
    LessThan,
    NotIn,
    All,
    Unknown(u16),
}

impl From<u16> for Operator {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::Equal,
            1 => Self::In,
            2 => Self::GreaterThanEqual,
            3 => Self::LessThanEqual,
            4 => Self::GreaterThan,
            5 => Self::Between,
            6 => Self::InArray,
            7 => Self::Or,
            8 => Self::LessThan,
            9 => Self::NotIn,
            10 => Self::All,
            other => Self::Unknown(other),
        }
    }
}

impl From<Operator> for u16 {
    fn from(op: Operator) -> Self {
        match op {
            Operator::Equal => 0,
            Operator::In => 1,
            Operator::GreaterThanEqual => 2,
            Operator::LessThanEqual => 3,
            Operator::GreaterThan => 4,
            Operator::Between => 5,
            Operator::InArray => 6,
            Operator::Or => 7,
            Operator::LessThan => 8,
            Operator::NotIn => 9,
            Operator::All => 10,
            Operator::Unknown(code) => code,
        }
    }
}

/// Native update operators, serialized as their `$`-prefixed names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateOperator {
    #[serde(rename = "$set")]
    Set,
    #[serde(rename = "$unset")]
    Unset,
    #[serde(rename = "$push")]
    Push,
    #[serde(rename = "$pull")]
    Pull,
    #[serde(rename = "$inc")]
    Inc,
    #[serde(rename = "$in")]
    ArrayIn,
    #[serde(rename = "$not")]
    Not,
}

impl UpdateOperator {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Set => "$set",
            Self::Unset => "$unset",
            Self::Push => "$push",
            Self::Pull => "$pull",
            Self::Inc => "$inc",
            Self::ArrayIn => "$in",
            Self::Not => "$not",
        }
    }
}

impl std::fmt::Display for UpdateOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive bounds for `Operator::Between`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub left: Bson,
    pub right: Bson,
}

/// Payload of a filter or update entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Scalar(Bson),
    Array(Vec<Bson>),
    Range(Range),
    Filters(Filters),
}

impl Value {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Array(_) => "array",
            Self::Range(_) => "range",
            Self::Filters(_) => "filters",
        }
    }
}

impl From<Bson> for Value {
    fn from(v: Bson) -> Self {
        match v {
            Bson::Array(items) => Self::Array(items),
            other => Self::Scalar(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub key: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub operator: Operator,
}

fn bson_array<I, V>(values: I) -> Vec<Bson>
where
    I: IntoIterator<Item = V>,
    V: Into<Bson>,
{
    values.into_iter().map(Into::into).collect()
}

impl Filter {
    /// Untyped constructor; payload/operator mismatches surface at translation.
    pub fn new(key: impl Into<String>, value: Value, data_type: DataType, operator: Operator) -> Self {
        Self { key: key.into(), value, data_type, operator }
    }

    fn scalar(key: impl Into<String>, value: impl Into<Bson>, operator: Operator) -> Self {
        let value = value.into();
        let data_type = DataType::of(&value);
        Self { key: key.into(), value: Value::Scalar(value), data_type, operator }
    }

    fn array<I, V>(key: impl Into<String>, values: I, operator: Operator) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values = bson_array(values);
        let data_type = DataType::array_of(&values);
        Self { key: key.into(), value: Value::Array(values), data_type, operator }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::scalar(key, value, Operator::Equal)
    }

    /// Equality against an array field: matches documents whose array contains `value`.
    pub fn in_array(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::scalar(key, value, Operator::InArray)
    }

    pub fn gt(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::scalar(key, value, Operator::GreaterThan)
    }

    pub fn gte(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::scalar(key, value, Operator::GreaterThanEqual)
    }

    pub fn lt(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::scalar(key, value, Operator::LessThan)
    }

    pub fn lte(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::scalar(key, value, Operator::LessThanEqual)
    }

    pub fn is_in<I, V>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Self::array(key, values, Operator::In)
    }

    pub fn not_in<I, V>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Self::array(key, values, Operator::NotIn)
    }

    pub fn all<I, V>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Self::array(key, values, Operator::All)
    }

    pub fn between(key: impl Into<String>, left: impl Into<Bson>, right: impl Into<Bson>) -> Self {
        let left = left.into();
        let data_type = DataType::of(&left);
        Self {
            key: key.into(),
            value: Value::Range(Range { left, right: right.into() }),
            data_type,
            operator: Operator::Between,
        }
    }

    /// Disjunction over the single-field constraints of `filters`, emitted under `$or`.
    #[must_use]
    pub fn or(filters: Filters) -> Self {
        Self {
            key: "$or".to_string(),
            value: Value::Filters(filters),
            data_type: DataType::Any,
            operator: Operator::Or,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub key: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(rename = "update_operator")]
    pub operator: UpdateOperator,
}

impl Update {
    pub fn new(
        key: impl Into<String>,
        value: Value,
        data_type: DataType,
        operator: UpdateOperator,
    ) -> Self {
        Self { key: key.into(), value, data_type, operator }
    }

    fn typed(key: impl Into<String>, value: impl Into<Bson>, operator: UpdateOperator) -> Self {
        let value = value.into();
        let data_type = DataType::of(&value);
        Self { key: key.into(), value: Value::from(value), data_type, operator }
    }

    pub fn set(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::typed(key, value, UpdateOperator::Set)
    }

    pub fn unset(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Value::Scalar(Bson::String(String::new())),
            data_type: DataType::Any,
            operator: UpdateOperator::Unset,
        }
    }

    /// Appends one element to the array at `key`.
    pub fn push(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        let value = value.into();
        let data_type = DataType::of(&value);
        Self {
            key: key.into(),
            value: Value::Scalar(value),
            data_type,
            operator: UpdateOperator::Push,
        }
    }

    /// Appends every element of `values`, in order, to the array at `key`.
    pub fn push_each<I, V>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values = bson_array(values);
        let data_type = DataType::array_of(&values);
        Self { key: key.into(), value: Value::Array(values), data_type, operator: UpdateOperator::Push }
    }

    pub fn pull(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::typed(key, value, UpdateOperator::Pull)
    }

    pub fn inc(key: impl Into<String>, by: impl Into<Bson>) -> Self {
        Self::typed(key, by, UpdateOperator::Inc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Order {
    Asc,
    Desc,
}

impl TryFrom<i32> for Order {
    type Error = String;
    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::Asc),
            -1 => Ok(Self::Desc),
            other => Err(format!("sort order must be 1 or -1, got {other}")),
        }
    }
}

impl From<Order> for i32 {
    fn from(o: Order) -> Self {
        match o {
            Order::Asc => 1,
            Order::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub key: String,
    pub order: Order,
}

impl SortKey {
    pub fn asc(key: impl Into<String>) -> Self {
        Self { key: key.into(), order: Order::Asc }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self { key: key.into(), order: Order::Desc }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub key: String,
    pub value: Bson,
}

impl Projection {
    pub fn include(key: impl Into<String>) -> Self {
        Self { key: key.into(), value: Bson::Int32(1) }
    }

    pub fn exclude(key: impl Into<String>) -> Self {
        Self { key: key.into(), value: Bson::Int32(0) }
    }
}

/// One grouping dimension: output `key` bound to a native expression such as `"$day"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupKey {
    pub key: String,
    pub value: Bson,
}

impl GroupKey {
    pub fn new(key: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Groups on a document field, keeping the field name as the output key.
    pub fn field(name: &str) -> Self {
        Self { key: name.to_string(), value: Bson::String(format!("${name}")) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum AggregateOperator {
    Sum,
    Min,
    Max,
    Unknown(u16),
}

impl AggregateOperator {
    #[must_use]
    pub const fn native(self) -> Option<&'static str> {
        match self {
            Self::Sum => Some("$sum"),
            Self::Min => Some("$min"),
            Self::Max => Some("$max"),
            Self::Unknown(_) => None,
        }
    }
}

impl From<u16> for AggregateOperator {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::Sum,
            2 => Self::Min,
            3 => Self::Max,
            other => Self::Unknown(other),
        }
    }
}

impl From<AggregateOperator> for u16 {
    fn from(op: AggregateOperator) -> Self {
        match op {
            AggregateOperator::Sum => 1,
            AggregateOperator::Min => 2,
            AggregateOperator::Max => 3,
            AggregateOperator::Unknown(code) => code,
        }
    }
}

/// One aggregated output field: `key` = `operator(value)`, where `value` is a
/// native expression (usually a `"$field"` reference).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateKey {
    pub key: String,
    pub operator: AggregateOperator,
    pub value: String,
}

impl AggregateKey {
    pub fn new(key: impl Into<String>, operator: AggregateOperator, value: impl Into<String>) -> Self {
        Self { key: key.into(), operator, value: value.into() }
    }
}

macro_rules! sequence {
    ($(#[$meta:meta])* $name:ident, $item:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Vec<$item>);

        impl $name {
            #[must_use]
            pub const fn new() -> Self {
                Self(Vec::new())
            }

            /// Appends entries after the existing ones, preserving order.
            pub fn append<I: IntoIterator<Item = $item>>(&mut self, items: I) {
                self.0.extend(items);
            }

            pub fn push(&mut self, item: $item) {
                self.0.push(item);
            }

            #[must_use]
            pub fn len(&self) -> usize {
                self.0.len()
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn iter(&self) -> std::slice::Iter<'_, $item> {
                self.0.iter()
            }

            #[must_use]
            pub fn as_slice(&self) -> &[$item] {
                &self.0
            }
        }

        impl From<Vec<$item>> for $name {
            fn from(v: Vec<$item>) -> Self {
                Self(v)
            }
        }

        impl FromIterator<$item> for $name {
            fn from_iter<I: IntoIterator<Item = $item>>(iter: I) -> Self {
                Self(iter.into_iter().collect())
            }
        }

        impl<'a> IntoIterator for &'a $name {
            type Item = &'a $item;
            type IntoIter = std::slice::Iter<'a, $item>;
            fn into_iter(self) -> Self::IntoIter {
                self.0.iter()
            }
        }

        impl IntoIterator for $name {
            type Item = $item;
            type IntoIter = std::vec::IntoIter<$item>;
            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }
    };
}

sequence!(Filters, Filter);
sequence!(Updates, Update);
sequence!(GroupKeys, GroupKey);
sequence!(AggregateKeys, AggregateKey);
