//! Transaction start parameters, shared by the `sync` and `tokio` transports.

/// `BEGIN`'s isolation level clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// `isolation`/`read_only`/`deferrable` passed to `Conn::transaction_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    /// Render the full `BEGIN` statement for these options.
    ///
    /// `DEFERRABLE` is only meaningful for `SERIALIZABLE READ ONLY`
    /// transactions; the server ignores it otherwise, so it's always emitted
    /// when set rather than conditioned on the other two fields.
    pub(crate) fn begin_sql(self) -> String {
        let mut sql = format!("BEGIN ISOLATION LEVEL {}", self.isolation.as_sql());
        sql.push_str(if self.read_only {
            " READ ONLY"
        } else {
            " READ WRITE"
        });
        if self.deferrable {
            sql.push_str(" DEFERRABLE");
        }
        sql
    }
}

/// Validate a savepoint identifier before interpolating it into SQL.
///
/// Savepoint names can't be passed as bound parameters (`SAVEPOINT $1` isn't
/// valid syntax), so this is the injection guard.
pub(crate) fn validate_savepoint_name(name: &str) -> crate::error::Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(crate::error::Error::InvalidUsage(format!(
            "invalid savepoint name: {name:?}"
        )))
    }
}
