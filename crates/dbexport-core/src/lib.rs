use std::fmt;
use std::path::PathBuf;

use encoding_rs::Encoding;

// 核心模块导出
pub mod config;
pub mod driver;
pub mod export;
pub mod params;
pub mod release;
pub mod sql;
pub mod writer;

pub use config::ConfigError;
pub use driver::{DatabaseDriver, DatabaseSession, DriverError, PreparedQuery, RowCursor, create_connection};
pub use export::{ExportError, ExportSummary, export, run};
pub use params::{BindParam, parse_params};
pub use release::{Release, Scoped};
pub use sql::{SqlLoadError, load_sql, normalize_sql};
pub use writer::{RowWriter, render_line};

// ============================================================================
// Model Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbFlavor {
    Oracle,
    MySQL,
    SQLServer,
    SQLite,
}

impl DbFlavor {
    /// 按 `db_type` 选择数据库类型，大小写不敏感，无法识别时回落到 Oracle
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim();
        if tag.eq_ignore_ascii_case("mysql") {
            DbFlavor::MySQL
        } else if tag.eq_ignore_ascii_case("mssql") {
            DbFlavor::SQLServer
        } else if tag.eq_ignore_ascii_case("sqlite") {
            DbFlavor::SQLite
        } else {
            DbFlavor::Oracle
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DbFlavor::Oracle => "Oracle",
            DbFlavor::MySQL => "MySQL",
            DbFlavor::SQLServer => "SQLServer",
            DbFlavor::SQLite => "SQLite",
        }
    }
}

#[derive(Clone)]
pub struct ConnectionOptions {
    pub flavor: DbFlavor,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            flavor: DbFlavor::Oracle,
            host: "127.0.0.1".into(),
            port: 1521,
            database: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl ConnectionOptions {
    /// 用于日志展示的连接地址（不含密码）
    pub fn endpoint(&self) -> String {
        match self.flavor {
            DbFlavor::Oracle => format!("oracle:thin:@{}:{}:{}", self.host, self.port, self.database),
            DbFlavor::MySQL => format!("mysql://{}:{}/{}", self.host, self.port, self.database),
            DbFlavor::SQLServer => {
                format!("sqlserver://{}:{};DatabaseName={}", self.host, self.port, self.database)
            }
            DbFlavor::SQLite => format!("sqlite://{}", self.database),
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("flavor", &self.flavor)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineBreak {
    Cr,
    Lf,
    #[default]
    CrLf,
}

impl LineBreak {
    /// `line_feed` 配置：`\r` 只用 CR，`\n` 只用 LF，其余一律 CRLF
    pub fn from_setting(value: &str) -> Self {
        match value {
            "\\r" | "\r" => LineBreak::Cr,
            "\\n" | "\n" => LineBreak::Lf,
            _ => LineBreak::CrLf,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineBreak::Cr => "\r",
            LineBreak::Lf => "\n",
            LineBreak::CrLf => "\r\n",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    pub separator: String,
    pub show_header: bool,
    pub null_text: String,
    pub line_break: LineBreak,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            separator: "\t".into(),
            show_header: false,
            null_text: String::new(),
            line_break: LineBreak::CrLf,
        }
    }
}

/// 一次导出所需的全部配置，加载后只读
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub connection: ConnectionOptions,
    pub sql_path: PathBuf,
    pub sql_charset: &'static Encoding,
    pub params: Vec<BindParam>,
    pub output_path: PathBuf,
    pub output_charset: &'static Encoding,
    pub format: FormatOptions,
}
