/// Comparison/membership operators a condition node may carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    In,
    Exists,
}

/// A literal value parsed from the filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    String(String),
    Number(f64),
    List(Vec<FilterValue>),
}

/// Logic operators a binary node may carry. Kept as its own enum (rather
/// than reusing [`Operator`]) so a programmatic caller constructing an AST
/// directly cannot smuggle in a comparison operator at a binary-node site —
/// the query builder re-validates this enumeration regardless.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicOp {
    And,
    Or,
}

/// Two node variants: a leaf condition, or a binary AND/OR combination.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Condition {
        field: String,
        operator: Operator,
        value: Option<FilterValue>,
        negated: bool,
    },
    Binary {
        left: Box<Expr>,
        operator: LogicOp,
        right: Box<Expr>,
    },
}
