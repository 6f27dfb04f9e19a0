use std::borrow::Cow;

use crate::{BindParam, ConnectionOptions, DbFlavor};

#[cfg(feature = "with-mysql")]
pub use self::mysql::MySQLDriver;
#[cfg(feature = "with-oracle")]
pub use self::oracle::OracleDriver;
#[cfg(feature = "with-sqlite")]
pub use self::sqlite::SQLiteDriver;
#[cfg(feature = "with-mssql")]
pub use self::sqlserver::SQLServerDriver;

#[cfg(feature = "with-mysql")]
mod mysql;
#[cfg(feature = "with-oracle")]
mod oracle;
#[cfg(feature = "with-sqlite")]
mod sqlite;
#[cfg(feature = "with-mssql")]
mod sqlserver;

/// 一行结果，`None` 表示数据库返回的 NULL
pub type RowValues = Vec<Option<String>>;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Other(String),
    #[error("配置字段缺失: {0}")]
    MissingField(String),
    #[error("配置字段非法: {0}")]
    InvalidField(String),
    #[error("{0} 驱动未编译，请启用对应的 feature")]
    Unsupported(&'static str),
    #[error("{0} 已关闭")]
    Closed(&'static str),
}

pub trait DatabaseDriver {
    fn create_connection(
        &self,
        config: &ConnectionOptions,
    ) -> Result<Box<dyn DatabaseSession>, DriverError>;
}

/// 数据库会话，打开时已关闭自动提交
pub trait DatabaseSession {
    fn prepare(
        &mut self,
        sql: &str,
    ) -> Result<Box<dyn PreparedQuery + '_>, DriverError>;

    fn rollback(&mut self) -> Result<(), DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;
}

/// 预编译语句，参数位置从 1 开始
pub trait PreparedQuery {
    fn bind(
        &mut self,
        index: usize,
        param: &BindParam,
    ) -> Result<(), DriverError>;

    fn query(&mut self) -> Result<Box<dyn RowCursor + '_>, DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;
}

/// 只进游标
pub trait RowCursor {
    fn labels(&self) -> &[String];

    fn next_row(&mut self) -> Result<Option<RowValues>, DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;
}

pub fn create_connection(opts: &ConnectionOptions) -> Result<Box<dyn DatabaseSession>, DriverError> {
    match opts.flavor {
        #[cfg(feature = "with-oracle")]
        DbFlavor::Oracle => OracleDriver.create_connection(opts),
        #[cfg(feature = "with-mysql")]
        DbFlavor::MySQL => MySQLDriver.create_connection(opts),
        #[cfg(feature = "with-mssql")]
        DbFlavor::SQLServer => SQLServerDriver.create_connection(opts),
        #[cfg(feature = "with-sqlite")]
        DbFlavor::SQLite => SQLiteDriver.create_connection(opts),
        #[allow(unreachable_patterns)]
        other => Err(DriverError::Unsupported(other.label())),
    }
}

pub fn validate_sql(sql: &str) -> Result<(), DriverError> {
    if sql.trim().is_empty() {
        return Err(DriverError::InvalidField("sql".into()));
    }
    Ok(())
}

/// 所有占位符都必须绑定过，未绑定的位置不会默认为 NULL
pub fn ensure_bound(bound: &[bool]) -> Result<(), DriverError> {
    match bound.iter().position(|b| !b) {
        Some(idx) => Err(DriverError::InvalidField(format!(
            "参数个数不匹配: 共 {} 个占位符，第 {} 个未绑定",
            bound.len(),
            idx + 1
        ))),
        None => Ok(()),
    }
}

/// 二进制列按大写十六进制输出
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

#[derive(Clone, Copy)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    BracketQuoted,
    LineComment,
    BlockComment,
}

/// 将 `?` 占位符按出现顺序改写为驱动要求的形式（如 `:1`、`@P1`）
///
/// 字符串、带引号的标识符和注释中的 `?` 保持原样。
pub fn rewrite_placeholders(
    sql: &str,
    placeholder: impl Fn(usize) -> String,
) -> Cow<'_, str> {
    if !sql.contains('?') {
        return Cow::Borrowed(sql);
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut state = State::Normal;
    let mut count = 0;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '?' => {
                    count += 1;
                    out.push_str(&placeholder(count));
                    continue;
                }
                '\'' => state = State::SingleQuoted,
                '"' => state = State::DoubleQuoted,
                '[' => state = State::BracketQuoted,
                '-' if chars.peek() == Some(&'-') => state = State::LineComment,
                '/' if chars.peek() == Some(&'*') => {
                    out.push(c);
                    out.extend(chars.next());
                    state = State::BlockComment;
                    continue;
                }
                _ => {}
            },
            State::SingleQuoted if c == '\'' => state = State::Normal,
            State::DoubleQuoted if c == '"' => state = State::Normal,
            State::BracketQuoted if c == ']' => state = State::Normal,
            State::LineComment if c == '\n' => state = State::Normal,
            State::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                out.push(c);
                out.extend(chars.next());
                state = State::Normal;
                continue;
            }
            _ => {}
        }
        out.push(c);
    }

    Cow::Owned(out)
}
