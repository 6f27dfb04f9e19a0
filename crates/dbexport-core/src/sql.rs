use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlLoadError {
    #[error("无法读取 SQL 文件 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("SQL 文件 {path} 不是合法的 {charset} 编码")]
    Decode { path: PathBuf, charset: &'static str },

    #[error("SQL 文件 {0} 没有可执行的语句")]
    Empty(PathBuf),
}

/// 读取 SQL 文件并整理为单行语句
pub fn load_sql(
    path: &Path,
    encoding: &'static Encoding,
) -> Result<String, SqlLoadError> {
    let bytes = fs::read(path).map_err(|source| SqlLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // 只去掉与配置字符集一致的 BOM，不按 BOM 切换字符集
    let (text, had_errors) = encoding.decode_with_bom_removal(&bytes);
    if had_errors {
        return Err(SqlLoadError::Decode {
            path: path.to_path_buf(),
            charset: encoding.name(),
        });
    }

    normalize_sql(&text).ok_or_else(|| SqlLoadError::Empty(path.to_path_buf()))
}

/// 逐行去除首尾空白、丢弃空行后以单个空格连接，并去掉末尾的一个分号
///
/// 没有任何语句内容时返回 `None`。
pub fn normalize_sql(text: &str) -> Option<String> {
    let mut buffer = String::with_capacity(text.len());
    for line in text.split(['\n', '\r']) {
        let line = line.trim_matches(|c: char| c <= ' ');
        if !line.is_empty() {
            buffer.push(' ');
            buffer.push_str(line);
        }
    }

    let statement = buffer.strip_suffix(';').unwrap_or(&buffer);
    let statement = statement.strip_prefix(' ').unwrap_or(statement);
    if statement.is_empty() {
        return None;
    }
    Some(statement.to_string())
}
