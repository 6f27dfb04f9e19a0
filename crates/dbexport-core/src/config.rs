use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use thiserror::Error;

use crate::{ConnectionOptions, DbFlavor, ExportConfig, FormatOptions, LineBreak, parse_params};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("无法读取配置文件 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("配置文件格式错误: {0}")]
    Properties(#[from] java_properties::PropertiesError),

    #[error("配置项 {key} 取值非法: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("不支持的字符集: {0}")]
    UnknownCharset(String),

    #[error("params 解析失败: {0}")]
    Params(String),
}

impl ExportConfig {
    /// 读取 properties 配置文件
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let props = java_properties::read(BufReader::new(file))?;
        tracing::debug!("配置文件 {:?} 共 {} 项", path, props.len());
        Self::from_properties(&props)
    }

    /// 按默认值补齐所有配置项
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str, default: &str| props.get(key).map(String::as_str).unwrap_or(default).to_string();

        let port_text = get("port", "1521");
        let port = port_text.trim().parse::<u16>().map_err(|_| ConfigError::InvalidValue {
            key: "port",
            value: port_text.clone(),
        })?;

        let connection = ConnectionOptions {
            flavor: DbFlavor::from_tag(&get("db_type", "oracle")),
            host: get("host", "127.0.0.1"),
            port,
            database: get("db", ""),
            username: get("user", ""),
            password: get("password", ""),
        };

        let format = FormatOptions {
            separator: get("split", "\t"),
            show_header: is_truthy(&get("header", "0")),
            null_text: get("null_str", ""),
            line_break: LineBreak::from_setting(&get("line_feed", "")),
        };

        Ok(Self {
            connection,
            sql_path: PathBuf::from(get("sql", "sql.sql")),
            sql_charset: charset(&get("sql.charset", "UTF-8"))?,
            params: parse_params(&get("params", ""))?,
            output_path: PathBuf::from(get("output", "result.txt")),
            output_charset: charset(&get("output.charset", "UTF-8"))?,
            format,
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "True" | "TRUE")
}

fn charset(label: &str) -> Result<&'static Encoding, ConfigError> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| ConfigError::UnknownCharset(label.to_string()))
}
