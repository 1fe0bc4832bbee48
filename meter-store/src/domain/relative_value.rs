/// One row of `relative_values`: the cached percentile of a meter for a gauge,
/// optionally scoped to a permission.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RelativeValueRow {
    pub id: i64,
    pub meter_uuid: String,
    /// Grouping rules as stored (JSON text). `None` rows are never refreshed.
    pub grouping: Option<String>,
    pub relative_value: Option<i32>,
    pub permission: Option<String>,
}

/// A relative-value row joined with the meter it tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeValueTarget {
    pub row: RelativeValueRow,
    pub meter_id: i64,
    pub current: Option<f64>,
}
