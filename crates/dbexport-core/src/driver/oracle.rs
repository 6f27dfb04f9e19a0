use oracle::{Connection, ResultSet, Row, Statement, sql_type::ToSql};

use crate::{BindParam, ConnectionOptions};

use super::{
    DatabaseDriver, DatabaseSession, DriverError, PreparedQuery, RowCursor, RowValues, rewrite_placeholders,
    validate_sql,
};

/// Oracle 驱动（基于 ODPI-C，运行时需要 Oracle Instant Client）
#[derive(Debug, Clone, Copy)]
pub struct OracleDriver;

impl DatabaseDriver for OracleDriver {
    fn create_connection(
        &self,
        config: &ConnectionOptions,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        if config.host.trim().is_empty() {
            return Err(DriverError::MissingField("host".into()));
        }
        if config.database.trim().is_empty() {
            return Err(DriverError::MissingField("db".into()));
        }

        let mut conn = Connection::connect(&config.username, &config.password, connect_descriptor(config))
            .map_err(|err| DriverError::Other(format!("连接失败: {}", err)))?;
        conn.set_autocommit(false);
        Ok(Box::new(OracleSession { conn }))
    }
}

/// 按 SID 连接，对应 `host:port:sid` 形式的地址
fn connect_descriptor(config: &ConnectionOptions) -> String {
    format!(
        "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={})(PORT={}))(CONNECT_DATA=(SID={})))",
        config.host.trim(),
        config.port,
        config.database.trim()
    )
}

struct OracleSession {
    conn: Connection,
}

impl DatabaseSession for OracleSession {
    fn prepare(
        &mut self,
        sql: &str,
    ) -> Result<Box<dyn PreparedQuery + '_>, DriverError> {
        validate_sql(sql)?;
        let sql = rewrite_placeholders(sql, |n| format!(":{}", n));
        let stmt = self
            .conn
            .statement(&sql)
            .build()
            .map_err(|err| DriverError::Other(format!("预编译失败: {}", err)))?;
        Ok(Box::new(OracleStatement { stmt }))
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.conn
            .rollback()
            .map_err(|err| DriverError::Other(format!("回滚失败: {}", err)))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.conn
            .close()
            .map_err(|err| DriverError::Other(format!("关闭连接失败: {}", err)))
    }
}

struct OracleStatement {
    stmt: Statement,
}

impl PreparedQuery for OracleStatement {
    fn bind(
        &mut self,
        index: usize,
        param: &BindParam,
    ) -> Result<(), DriverError> {
        let value: Box<dyn ToSql> = match param {
            BindParam::Int(v) => Box::new(*v),
            BindParam::Long(v) => Box::new(*v),
            // Oracle SQL 没有布尔类型，按 1/0 绑定
            BindParam::Bool(v) => Box::new(i32::from(*v)),
            BindParam::Double(v) => Box::new(*v),
            BindParam::Float(v) => Box::new(*v),
            BindParam::Date(v) => Box::new(*v),
            BindParam::Str(v) => Box::new(v.clone()),
            BindParam::Null => Box::new(None::<String>),
        };
        self.stmt
            .bind(index, value.as_ref())
            .map_err(|err| DriverError::Other(format!("绑定第 {} 个参数失败: {}", index, err)))
    }

    fn query(&mut self) -> Result<Box<dyn RowCursor + '_>, DriverError> {
        let rows = self
            .stmt
            .query(&[])
            .map_err(|err| DriverError::Other(format!("执行查询失败: {}", err)))?;
        let labels = rows.column_info().iter().map(|col| col.name().to_string()).collect();
        Ok(Box::new(OracleCursor {
            rows: Some(rows),
            labels,
        }))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.stmt
            .close()
            .map_err(|err| DriverError::Other(format!("关闭语句失败: {}", err)))
    }
}

struct OracleCursor<'s> {
    rows: Option<ResultSet<'s, Row>>,
    labels: Vec<String>,
}

impl RowCursor for OracleCursor<'_> {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn next_row(&mut self) -> Result<Option<RowValues>, DriverError> {
        let rows = self.rows.as_mut().ok_or(DriverError::Closed("cursor"))?;
        let Some(row) = rows.next() else {
            return Ok(None);
        };
        let row = row.map_err(|err| DriverError::Other(format!("读取结果失败: {}", err)))?;

        let mut values = Vec::with_capacity(self.labels.len());
        for idx in 0..self.labels.len() {
            let value: Option<String> = row
                .get(idx)
                .map_err(|err| DriverError::Other(format!("读取第 {} 列失败: {}", idx + 1, err)))?;
            values.push(value);
        }
        Ok(Some(values))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.rows = None;
        Ok(())
    }
}
