use chrono::Datelike;
use mysql::{
    Binary, Conn, Opts, OptsBuilder, Params, QueryResult, Statement, Value, consts::ColumnType, prelude::Queryable,
};

use crate::{BindParam, ConnectionOptions};

use super::{
    DatabaseDriver, DatabaseSession, DriverError, PreparedQuery, RowCursor, RowValues, ensure_bound, hex, validate_sql,
};

/// binary 字符集编号，BLOB/VARBINARY 列使用
const BINARY_CHARSET: u16 = 63;

#[derive(Debug, Clone, Copy)]
pub struct MySQLDriver;

impl DatabaseDriver for MySQLDriver {
    fn create_connection(
        &self,
        config: &ConnectionOptions,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let mut conn = open_conn(config)?;
        conn.query_drop("SET autocommit = 0")
            .map_err(|err| DriverError::Other(format!("关闭自动提交失败: {}", err)))?;
        Ok(Box::new(MySQLSession { conn: Some(conn) }))
    }
}

struct MySQLSession {
    conn: Option<Conn>,
}

impl DatabaseSession for MySQLSession {
    fn prepare(
        &mut self,
        sql: &str,
    ) -> Result<Box<dyn PreparedQuery + '_>, DriverError> {
        validate_sql(sql)?;
        let conn = self.conn.as_mut().ok_or(DriverError::Closed("connection"))?;
        let stmt = conn
            .prep(sql)
            .map_err(|err| DriverError::Other(format!("预编译失败: {}", err)))?;
        let values = vec![None; stmt.num_params() as usize];
        Ok(Box::new(MySQLStatement {
            conn,
            stmt: Some(stmt),
            values,
        }))
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let conn = self.conn.as_mut().ok_or(DriverError::Closed("connection"))?;
        conn.query_drop("ROLLBACK")
            .map_err(|err| DriverError::Other(format!("回滚失败: {}", err)))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        // Conn 在 drop 时发送 COM_QUIT
        drop(self.conn.take());
        Ok(())
    }
}

struct MySQLStatement<'c> {
    conn: &'c mut Conn,
    stmt: Option<Statement>,
    values: Vec<Option<Value>>,
}

impl PreparedQuery for MySQLStatement<'_> {
    fn bind(
        &mut self,
        index: usize,
        param: &BindParam,
    ) -> Result<(), DriverError> {
        let slot = index
            .checked_sub(1)
            .and_then(|idx| self.values.get_mut(idx))
            .ok_or_else(|| DriverError::InvalidField(format!("参数位置越界: {}", index)))?;
        *slot = Some(to_value(param));
        Ok(())
    }

    fn query(&mut self) -> Result<Box<dyn RowCursor + '_>, DriverError> {
        let stmt = self.stmt.as_ref().ok_or(DriverError::Closed("statement"))?;
        let bound = self.values.iter().map(Option::is_some).collect::<Vec<_>>();
        ensure_bound(&bound)?;
        let params = if self.values.is_empty() {
            Params::Empty
        } else {
            Params::Positional(self.values.iter().flatten().cloned().collect())
        };

        let result = self
            .conn
            .exec_iter(stmt, params)
            .map_err(|err| DriverError::Other(format!("执行查询失败: {}", err)))?;

        let columns = result.columns();
        let labels = columns.as_ref().iter().map(|col| col.name_str().to_string()).collect();
        let kinds = columns
            .as_ref()
            .iter()
            .map(|col| ColumnKind {
                kind: col.column_type(),
                binary: is_binary(col.column_type(), col.character_set()),
            })
            .collect();

        Ok(Box::new(MySQLCursor {
            result: Some(result),
            labels,
            kinds,
        }))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        match self.stmt.take() {
            Some(stmt) => self
                .conn
                .close(stmt)
                .map_err(|err| DriverError::Other(format!("关闭语句失败: {}", err))),
            None => Ok(()),
        }
    }
}

struct MySQLCursor<'s> {
    result: Option<QueryResult<'s, 's, 's, Binary>>,
    labels: Vec<String>,
    kinds: Vec<ColumnKind>,
}

#[derive(Debug, Clone, Copy)]
struct ColumnKind {
    kind: ColumnType,
    binary: bool,
}

impl RowCursor for MySQLCursor<'_> {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn next_row(&mut self) -> Result<Option<RowValues>, DriverError> {
        let result = self.result.as_mut().ok_or(DriverError::Closed("cursor"))?;
        let Some(row) = result.next() else {
            return Ok(None);
        };
        let row = row.map_err(|err| DriverError::Other(format!("读取结果失败: {}", err)))?;

        let values = row
            .unwrap()
            .into_iter()
            .zip(&self.kinds)
            .map(|(value, kind)| parse_value(value, *kind))
            .collect();
        Ok(Some(values))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        // 丢弃 QueryResult 时会读完剩余结果
        self.result = None;
        Ok(())
    }
}

fn open_conn(config: &ConnectionOptions) -> Result<Conn, DriverError> {
    if config.host.trim().is_empty() {
        return Err(DriverError::MissingField("host".into()));
    }

    let mut builder = OptsBuilder::new();
    builder = builder.ip_or_hostname(Some(config.host.clone()));
    builder = builder.tcp_port(config.port);
    builder = builder.user(Some(config.username.clone()));
    builder = builder.pass(Some(config.password.clone()));
    if !config.database.trim().is_empty() {
        builder = builder.db_name(Some(config.database.clone()));
    }

    let opts = Opts::from(builder);
    Conn::new(opts).map_err(|err| DriverError::Other(format!("连接失败: {}", err)))
}

fn to_value(param: &BindParam) -> Value {
    match param {
        BindParam::Int(v) => Value::Int(i64::from(*v)),
        BindParam::Long(v) => Value::Int(*v),
        BindParam::Bool(v) => Value::Int(i64::from(*v)),
        BindParam::Double(v) => Value::Double(*v),
        BindParam::Float(v) => Value::Float(*v),
        BindParam::Date(v) => Value::Date(v.year() as u16, v.month() as u8, v.day() as u8, 0, 0, 0, 0),
        BindParam::Str(v) => Value::Bytes(v.clone().into_bytes()),
        BindParam::Null => Value::NULL,
    }
}

fn is_binary(
    kind: ColumnType,
    charset: u16,
) -> bool {
    charset == BINARY_CHARSET
        && matches!(
            kind,
            ColumnType::MYSQL_TYPE_TINY_BLOB
                | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
                | ColumnType::MYSQL_TYPE_LONG_BLOB
                | ColumnType::MYSQL_TYPE_BLOB
                | ColumnType::MYSQL_TYPE_VARCHAR
                | ColumnType::MYSQL_TYPE_VAR_STRING
                | ColumnType::MYSQL_TYPE_STRING
        )
}

fn parse_value(
    value: Value,
    column: ColumnKind,
) -> Option<String> {
    let text = match value {
        Value::NULL => return None,
        Value::Bytes(bytes) if column.binary => hex(&bytes),
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(int) => int.to_string(),
        Value::UInt(uint) => uint.to_string(),
        Value::Float(float) => float.to_string(),
        Value::Double(double) => double.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            if column.kind == ColumnType::MYSQL_TYPE_DATE {
                format!("{year:04}-{month:02}-{day:02}")
            } else if micros == 0 {
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
            } else {
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}")
            }
        }
        Value::Time(neg, days, hours, minutes, seconds, micros) => {
            let sign = if neg { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            if micros == 0 {
                format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
            } else {
                format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
            }
        }
    };
    Some(text)
}
