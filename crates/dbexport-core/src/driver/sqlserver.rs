use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Query, QueryItem, QueryStream};
use tokio::{net::TcpStream, runtime::Runtime};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::{BindParam, ConnectionOptions};

use super::{
    DatabaseDriver, DatabaseSession, DriverError, PreparedQuery, RowCursor, RowValues, hex, rewrite_placeholders,
    validate_sql,
};

type SQLServerClient = Client<Compat<TcpStream>>;

/// SQL Server 驱动，tiberius 为异步实现，这里在单线程运行时上同步执行
#[derive(Debug, Clone, Copy)]
pub struct SQLServerDriver;

impl DatabaseDriver for SQLServerDriver {
    fn create_connection(
        &self,
        config: &ConnectionOptions,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        if config.host.trim().is_empty() {
            return Err(DriverError::MissingField("host".into()));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .map_err(|err| DriverError::Other(format!("创建运行时失败: {}", err)))?;

        let mut client = runtime.block_on(open_client(config))?;
        runtime
            .block_on(simple(&mut client, "SET IMPLICIT_TRANSACTIONS ON"))
            .map_err(|err| DriverError::Other(format!("关闭自动提交失败: {}", err)))?;

        Ok(Box::new(SQLServerSession {
            runtime,
            client: Some(client),
        }))
    }
}

async fn open_client(config: &ConnectionOptions) -> Result<SQLServerClient, DriverError> {
    let mut tiberius_config = Config::new();
    tiberius_config.host(config.host.trim());
    tiberius_config.port(config.port);
    if !config.database.trim().is_empty() {
        tiberius_config.database(config.database.trim());
    }
    tiberius_config.authentication(AuthMethod::sql_server(&config.username, &config.password));
    tiberius_config.trust_cert();

    let tcp = TcpStream::connect(tiberius_config.get_addr())
        .await
        .map_err(|err| DriverError::Other(format!("TCP 连接失败: {}", err)))?;
    tcp.set_nodelay(true)
        .map_err(|err| DriverError::Other(format!("设置 TCP_NODELAY 失败: {}", err)))?;

    Client::connect(tiberius_config, tcp.compat_write())
        .await
        .map_err(|err| DriverError::Other(format!("连接失败: {}", err)))
}

async fn simple(
    client: &mut SQLServerClient,
    sql: &str,
) -> tiberius::Result<()> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

struct SQLServerSession {
    runtime: Runtime,
    client: Option<SQLServerClient>,
}

impl DatabaseSession for SQLServerSession {
    fn prepare(
        &mut self,
        sql: &str,
    ) -> Result<Box<dyn PreparedQuery + '_>, DriverError> {
        validate_sql(sql)?;
        let client = self.client.as_mut().ok_or(DriverError::Closed("connection"))?;
        let sql = rewrite_placeholders(sql, |n| format!("@P{}", n)).into_owned();
        Ok(Box::new(SQLServerStatement {
            runtime: &self.runtime,
            client,
            sql: Some(sql),
            params: vec![],
        }))
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let client = self.client.as_mut().ok_or(DriverError::Closed("connection"))?;
        self.runtime
            .block_on(simple(client, "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION"))
            .map_err(|err| DriverError::Other(format!("回滚失败: {}", err)))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        match self.client.take() {
            Some(client) => self
                .runtime
                .block_on(client.close())
                .map_err(|err| DriverError::Other(format!("关闭连接失败: {}", err))),
            None => Ok(()),
        }
    }
}

struct SQLServerStatement<'c> {
    runtime: &'c Runtime,
    client: &'c mut SQLServerClient,
    sql: Option<String>,
    params: Vec<BindParam>,
}

impl PreparedQuery for SQLServerStatement<'_> {
    fn bind(
        &mut self,
        index: usize,
        param: &BindParam,
    ) -> Result<(), DriverError> {
        if index == 0 {
            return Err(DriverError::InvalidField("参数位置从 1 开始".into()));
        }
        if self.params.len() < index {
            self.params.resize(index, BindParam::Null);
        }
        self.params[index - 1] = param.clone();
        Ok(())
    }

    fn query(&mut self) -> Result<Box<dyn RowCursor + '_>, DriverError> {
        let sql = self.sql.clone().ok_or(DriverError::Closed("statement"))?;
        let mut query = Query::new(sql);
        for param in &self.params {
            match param {
                BindParam::Int(v) => query.bind(*v),
                BindParam::Long(v) => query.bind(*v),
                BindParam::Bool(v) => query.bind(*v),
                BindParam::Double(v) => query.bind(*v),
                BindParam::Float(v) => query.bind(*v),
                BindParam::Date(v) => query.bind(*v),
                BindParam::Str(v) => query.bind(v.clone()),
                BindParam::Null => query.bind(Option::<String>::None),
            }
        }

        let runtime = self.runtime;
        let mut stream = runtime
            .block_on(query.query(self.client))
            .map_err(|err| DriverError::Other(format!("执行查询失败: {}", err)))?;
        let labels = runtime
            .block_on(stream.columns())
            .map_err(|err| DriverError::Other(format!("读取列信息失败: {}", err)))?
            .map(|cols| cols.iter().map(|col| col.name().to_string()).collect())
            .unwrap_or_default();

        Ok(Box::new(SQLServerCursor {
            runtime,
            stream: Some(stream),
            labels,
        }))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.sql = None;
        Ok(())
    }
}

struct SQLServerCursor<'s> {
    runtime: &'s Runtime,
    stream: Option<QueryStream<'s>>,
    labels: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Row,
    Skip,
    Stop,
}

/// 只导出第一个结果集，后续结果集的元数据或数据行都意味着结束
fn step(
    is_row: bool,
    result_index: usize,
) -> Step {
    match (is_row, result_index) {
        (_, idx) if idx > 0 => Step::Stop,
        (true, _) => Step::Row,
        (false, _) => Step::Skip,
    }
}

impl RowCursor for SQLServerCursor<'_> {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn next_row(&mut self) -> Result<Option<RowValues>, DriverError> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            let item = self
                .runtime
                .block_on(stream.try_next())
                .map_err(|err| DriverError::Other(format!("读取结果失败: {}", err)))?;
            let Some(item) = item else {
                return Ok(None);
            };
            let next = match &item {
                QueryItem::Row(row) => step(true, row.result_index()),
                QueryItem::Metadata(meta) => step(false, meta.result_index()),
            };
            match (next, item) {
                (Step::Row, QueryItem::Row(row)) => {
                    let values = row.into_iter().map(parse_value).collect::<Result<_, _>>()?;
                    return Ok(Some(values));
                }
                (Step::Stop, _) => {
                    self.close()?;
                    return Ok(None);
                }
                _ => continue,
            }
        }
    }

    fn close(&mut self) -> Result<(), DriverError> {
        // 剩余结果必须读完，连接才能继续执行回滚
        if let Some(stream) = self.stream.take() {
            self.runtime
                .block_on(stream.into_results())
                .map_err(|err| DriverError::Other(format!("关闭结果集失败: {}", err)))?;
        }
        Ok(())
    }
}

fn parse_value(data: ColumnData<'static>) -> Result<Option<String>, DriverError> {
    let convert = |err: tiberius::error::Error| DriverError::Other(format!("转换列值失败: {}", err));

    let text = match &data {
        ColumnData::U8(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I16(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I32(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I64(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::F32(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::F64(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Bit(v) => v.as_ref().map(|v| if *v { "1".to_string() } else { "0".to_string() }),
        ColumnData::String(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Guid(v) => v.as_ref().map(|v| v.to_string().to_uppercase()),
        ColumnData::Binary(v) => v.as_ref().map(|v| hex(v)),
        ColumnData::Numeric(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Xml(v) => v.as_ref().map(|v| v.clone().into_owned().into_string()),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)
                .map_err(convert)?
                .map(|v| v.format("%Y-%m-%d %H:%M:%S%.f").to_string())
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)
            .map_err(convert)?
            .map(|v| v.format("%Y-%m-%d").to_string()),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)
            .map_err(convert)?
            .map(|v| v.format("%H:%M:%S%.f").to_string()),
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(&data)
            .map_err(convert)?
            .map(|v| v.format("%Y-%m-%d %H:%M:%S%.f %:z").to_string()),
        #[allow(unreachable_patterns)]
        _ => return Err(DriverError::Other("不支持的列类型".into())),
    };
    Ok(text)
}
