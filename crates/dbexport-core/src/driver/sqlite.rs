use rusqlite::{Connection, Rows, Statement, types::Null, types::ValueRef};

use crate::{BindParam, ConnectionOptions};

use super::{
    DatabaseDriver, DatabaseSession, DriverError, PreparedQuery, RowCursor, RowValues, ensure_bound, hex, validate_sql,
};

/// SQLite 驱动，`db` 配置项为数据库文件路径
#[derive(Debug, Clone, Copy)]
pub struct SQLiteDriver;

impl DatabaseDriver for SQLiteDriver {
    fn create_connection(
        &self,
        config: &ConnectionOptions,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let path = config.database.trim();
        if path.is_empty() {
            return Err(DriverError::MissingField("db".into()));
        }

        let conn = Connection::open(path).map_err(|err| DriverError::Other(format!("打开数据库失败: {}", err)))?;
        conn.execute_batch("BEGIN")
            .map_err(|err| DriverError::Other(format!("开启事务失败: {}", err)))?;
        Ok(Box::new(SQLiteSession { conn: Some(conn) }))
    }
}

struct SQLiteSession {
    conn: Option<Connection>,
}

impl SQLiteSession {
    fn conn(&self) -> Result<&Connection, DriverError> {
        self.conn.as_ref().ok_or(DriverError::Closed("connection"))
    }
}

impl DatabaseSession for SQLiteSession {
    fn prepare(
        &mut self,
        sql: &str,
    ) -> Result<Box<dyn PreparedQuery + '_>, DriverError> {
        validate_sql(sql)?;
        let stmt = self
            .conn()?
            .prepare(sql)
            .map_err(|err| DriverError::Other(format!("预编译失败: {}", err)))?;
        let bound = vec![false; stmt.parameter_count()];
        Ok(Box::new(SQLiteStatement {
            stmt: Some(stmt),
            bound,
        }))
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let conn = self.conn()?;
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK")
            .map_err(|err| DriverError::Other(format!("回滚失败: {}", err)))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(conn) => conn
                .close()
                .map_err(|(_, err)| DriverError::Other(format!("关闭连接失败: {}", err))),
            None => Ok(()),
        }
    }
}

struct SQLiteStatement<'c> {
    stmt: Option<Statement<'c>>,
    bound: Vec<bool>,
}

impl PreparedQuery for SQLiteStatement<'_> {
    fn bind(
        &mut self,
        index: usize,
        param: &BindParam,
    ) -> Result<(), DriverError> {
        let stmt = self.stmt.as_mut().ok_or(DriverError::Closed("statement"))?;
        let result = match param {
            BindParam::Int(v) => stmt.raw_bind_parameter(index, v),
            BindParam::Long(v) => stmt.raw_bind_parameter(index, v),
            BindParam::Bool(v) => stmt.raw_bind_parameter(index, v),
            BindParam::Double(v) => stmt.raw_bind_parameter(index, v),
            BindParam::Float(v) => stmt.raw_bind_parameter(index, f64::from(*v)),
            BindParam::Date(v) => stmt.raw_bind_parameter(index, v.format("%Y-%m-%d").to_string()),
            BindParam::Str(v) => stmt.raw_bind_parameter(index, v),
            BindParam::Null => stmt.raw_bind_parameter(index, Null),
        };
        result.map_err(|err| DriverError::Other(format!("绑定第 {} 个参数失败: {}", index, err)))?;
        if let Some(flag) = index.checked_sub(1).and_then(|idx| self.bound.get_mut(idx)) {
            *flag = true;
        }
        Ok(())
    }

    fn query(&mut self) -> Result<Box<dyn RowCursor + '_>, DriverError> {
        let stmt = self.stmt.as_mut().ok_or(DriverError::Closed("statement"))?;
        ensure_bound(&self.bound)?;
        let labels = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.raw_query();
        Ok(Box::new(SQLiteCursor {
            rows: Some(rows),
            labels,
        }))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        match self.stmt.take() {
            Some(stmt) => stmt
                .finalize()
                .map_err(|err| DriverError::Other(format!("关闭语句失败: {}", err))),
            None => Ok(()),
        }
    }
}

struct SQLiteCursor<'s> {
    rows: Option<Rows<'s>>,
    labels: Vec<String>,
}

impl RowCursor for SQLiteCursor<'_> {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn next_row(&mut self) -> Result<Option<RowValues>, DriverError> {
        let rows = self.rows.as_mut().ok_or(DriverError::Closed("cursor"))?;
        let Some(row) = rows
            .next()
            .map_err(|err| DriverError::Other(format!("读取结果失败: {}", err)))?
        else {
            return Ok(None);
        };

        let mut values = Vec::with_capacity(self.labels.len());
        for idx in 0..self.labels.len() {
            let value = row
                .get_ref(idx)
                .map_err(|err| DriverError::Other(format!("读取第 {} 列失败: {}", idx + 1, err)))?;
            values.push(parse_value(value));
        }
        Ok(Some(values))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.rows = None;
        Ok(())
    }
}

fn parse_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(int) => Some(int.to_string()),
        ValueRef::Real(real) => Some(real.to_string()),
        ValueRef::Text(text) => Some(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Some(hex(blob)),
    }
}
