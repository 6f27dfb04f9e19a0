use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::driver::{DatabaseSession, DriverError, create_connection};
use crate::release::Scoped;
use crate::sql::{SqlLoadError, load_sql};
use crate::writer::RowWriter;
use crate::ExportConfig;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    #[error("加载 SQL 失败: {0}")]
    SqlLoad(#[from] SqlLoadError),
    #[error("数据库连接失败: {0}")]
    Connection(#[source] DriverError),
    #[error("执行查询失败: {0}")]
    Execution(#[source] DriverError),
    #[error("写入输出文件失败: {0}")]
    Write(#[source] io::Error),
    #[error("回滚失败: {0}")]
    Rollback(#[source] DriverError),
}

/// 导出结果摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub rows: u64,
    pub columns: usize,
    pub header: bool,
    pub output: PathBuf,
}

/// 按配置完成一次导出：加载 SQL、连接数据库、写出结果文件
pub fn run(
    config: &ExportConfig,
    debug: bool,
) -> Result<ExportSummary, ExportError> {
    let sql = load_sql(&config.sql_path, config.sql_charset)?;
    if debug {
        tracing::info!("SQL: {}", sql);
    }

    tracing::info!("正在连接数据库: {}", config.connection.endpoint());
    let session = create_connection(&config.connection).map_err(ExportError::Connection)?;
    tracing::info!("数据库连接成功 (connected)");

    let output = config.output_path.clone();
    export(session, &sql, config, move || File::create(&output).map(BufWriter::new))
}

/// 在已打开的会话上执行查询并写出结果
///
/// 无论成功与否都会回滚会话；连接、语句、游标和输出按获取的逆序各自释放，
/// 释放失败只记录日志。`open` 在拿到游标之后才被调用。
pub fn export<W, F>(
    session: Box<dyn DatabaseSession>,
    sql: &str,
    config: &ExportConfig,
    open: F,
) -> Result<ExportSummary, ExportError>
where
    W: Write,
    F: FnOnce() -> io::Result<W>,
{
    let mut session = Scoped::new("connection", session);
    let result = stream_rows(&mut **session, sql, config, open);

    match (result, session.rollback()) {
        (result, Ok(())) => {
            tracing::info!("会话已回滚");
            result
        }
        (Ok(_), Err(err)) => {
            tracing::error!("回滚失败: {}", err);
            Err(ExportError::Rollback(err))
        }
        (Err(first), Err(err)) => {
            tracing::error!("回滚失败: {}", err);
            Err(first)
        }
    }
}

fn stream_rows<W, F>(
    session: &mut dyn DatabaseSession,
    sql: &str,
    config: &ExportConfig,
    open: F,
) -> Result<ExportSummary, ExportError>
where
    W: Write,
    F: FnOnce() -> io::Result<W>,
{
    let mut statement = Scoped::new("statement", session.prepare(sql).map_err(ExportError::Execution)?);
    for (idx, param) in config.params.iter().enumerate() {
        tracing::debug!("绑定参数 #{} ({}): {}", idx + 1, param.kind(), param);
        statement.bind(idx + 1, param).map_err(ExportError::Execution)?;
    }

    let mut cursor = Scoped::new("cursor", statement.query().map_err(ExportError::Execution)?);
    let labels = cursor.labels().to_vec();
    tracing::info!("查询完成，共 {} 列 (Resultset fetched)", labels.len());

    let out = open().map_err(ExportError::Write)?;
    let mut writer = Scoped::new("writer", RowWriter::new(out, config.output_charset, &config.format));

    if config.format.show_header {
        writer.write_header(&labels).map_err(ExportError::Write)?;
    }
    while let Some(row) = cursor.next_row().map_err(ExportError::Execution)? {
        writer.write_row(&row).map_err(ExportError::Write)?;
    }
    writer.flush().map_err(ExportError::Write)?;

    tracing::info!("导出完成，共 {} 行: {}", writer.rows(), config.output_path.display());
    Ok(ExportSummary {
        rows: writer.rows(),
        columns: labels.len(),
        header: config.format.show_header,
        output: config.output_path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use encoding_rs::UTF_8;

    use super::*;
    use crate::driver::{PreparedQuery, RowCursor, RowValues};
    use crate::{BindParam, ConnectionOptions, FormatOptions, LineBreak, parse_params};

    type Events = Rc<RefCell<Vec<String>>>;

    #[derive(Default, Clone)]
    struct Script {
        labels: Vec<String>,
        rows: Vec<RowValues>,
        fail_query: bool,
        fail_rollback: bool,
        fail_cursor_close: bool,
        fail_after: Option<usize>,
    }

    struct MockSession {
        events: Events,
        script: Script,
    }

    impl DatabaseSession for MockSession {
        fn prepare(
            &mut self,
            sql: &str,
        ) -> Result<Box<dyn PreparedQuery + '_>, DriverError> {
            self.events.borrow_mut().push(format!("prepare {}", sql));
            Ok(Box::new(MockStatement {
                events: self.events.clone(),
                script: &self.script,
            }))
        }

        fn rollback(&mut self) -> Result<(), DriverError> {
            self.events.borrow_mut().push("rollback".into());
            if self.script.fail_rollback {
                return Err(DriverError::Other("rollback refused".into()));
            }
            Ok(())
        }

        fn close(&mut self) -> Result<(), DriverError> {
            self.events.borrow_mut().push("close connection".into());
            Ok(())
        }
    }

    struct MockStatement<'c> {
        events: Events,
        script: &'c Script,
    }

    impl PreparedQuery for MockStatement<'_> {
        fn bind(
            &mut self,
            index: usize,
            param: &BindParam,
        ) -> Result<(), DriverError> {
            self.events.borrow_mut().push(format!("bind {} {}", index, param.kind()));
            Ok(())
        }

        fn query(&mut self) -> Result<Box<dyn RowCursor + '_>, DriverError> {
            self.events.borrow_mut().push("query".into());
            if self.script.fail_query {
                return Err(DriverError::Other("ORA-00942".into()));
            }
            Ok(Box::new(MockCursor {
                events: self.events.clone(),
                labels: self.script.labels.clone(),
                rows: self.script.rows.iter().cloned().collect(),
                fail_close: self.script.fail_cursor_close,
                fail_after: self.script.fail_after,
                served: 0,
            }))
        }

        fn close(&mut self) -> Result<(), DriverError> {
            self.events.borrow_mut().push("close statement".into());
            Ok(())
        }
    }

    struct MockCursor {
        events: Events,
        labels: Vec<String>,
        rows: VecDeque<RowValues>,
        fail_close: bool,
        fail_after: Option<usize>,
        served: usize,
    }

    impl RowCursor for MockCursor {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn next_row(&mut self) -> Result<Option<RowValues>, DriverError> {
            if self.fail_after == Some(self.served) {
                return Err(DriverError::Other("connection reset".into()));
            }
            self.served += 1;
            Ok(self.rows.pop_front())
        }

        fn close(&mut self) -> Result<(), DriverError> {
            self.events.borrow_mut().push("close cursor".into());
            if self.fail_close {
                return Err(DriverError::Other("cursor close failed".into()));
            }
            Ok(())
        }
    }

    /// 记录 flush 的输出，`fail_flush` 为真时 flush 总是失败
    struct EventSink {
        events: Events,
        fail_flush: bool,
    }

    impl Write for EventSink {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.events.borrow_mut().push("flush writer".into());
            if self.fail_flush {
                return Err(io::Error::other("disk full"));
            }
            Ok(())
        }
    }

    /// 写入共享缓冲区，便于在导出结束后检查内容
    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config(
        params: &str,
        format: FormatOptions,
    ) -> ExportConfig {
        ExportConfig {
            connection: ConnectionOptions::default(),
            sql_path: PathBuf::from("sql.sql"),
            sql_charset: UTF_8,
            params: parse_params(params).unwrap(),
            output_path: PathBuf::from("result.txt"),
            output_charset: UTF_8,
            format,
        }
    }

    fn mock_session(script: Script) -> (Box<dyn DatabaseSession>, Events) {
        let events = Events::default();
        let session = MockSession {
            events: events.clone(),
            script,
        };
        (Box::new(session), events)
    }

    fn two_columns() -> Script {
        Script {
            labels: vec!["col1".into(), "col2".into()],
            rows: vec![
                vec![Some("val1".into()), None],
                vec![Some("val2".into()), Some("x".into())],
                vec![None, None],
            ],
            ..Script::default()
        }
    }

    #[test]
    fn binds_in_order_with_their_kinds() {
        let (session, events) = mock_session(two_columns());
        let config = config(r#"[1, "abc", null]"#, FormatOptions::default());

        export(session, "select ?, ?, ?", &config, || Ok(SharedSink::default())).unwrap();

        let events = events.borrow();
        assert_eq!(
            events[..5],
            [
                "prepare select ?, ?, ?",
                "bind 1 int",
                "bind 2 string",
                "bind 3 null",
                "query"
            ]
        );
    }

    #[test]
    fn writes_header_and_rows() {
        let (session, _) = mock_session(two_columns());
        let format = FormatOptions {
            separator: ",".into(),
            show_header: true,
            null_text: "NULL".into(),
            line_break: LineBreak::CrLf,
        };
        let config = config("", format);
        let sink = SharedSink::default();
        let target = sink.clone();

        let summary = export(session, "select 1", &config, move || Ok(target)).unwrap();

        let text = String::from_utf8(sink.0.borrow().clone()).unwrap();
        assert_eq!(text, "col1,col2\r\nval1,NULL\r\nval2,x\r\nNULL,NULL\r\n");
        assert_eq!(text.lines().count() as u64, summary.rows + 1);
        assert!(text.lines().all(|line| line.split(',').count() == summary.columns));
        assert!(text.lines().all(|line| !line.starts_with(',')));
        assert_eq!(
            summary,
            ExportSummary {
                rows: 3,
                columns: 2,
                header: true,
                output: PathBuf::from("result.txt"),
            }
        );
    }

    #[test]
    fn line_count_matches_rows_without_header() {
        let (session, _) = mock_session(two_columns());
        let config = config("", FormatOptions::default());
        let sink = SharedSink::default();
        let target = sink.clone();

        let summary = export(session, "select 1", &config, move || Ok(target)).unwrap();

        let text = String::from_utf8(sink.0.borrow().clone()).unwrap();
        assert_eq!(text.lines().count() as u64, summary.rows);
        assert_eq!(text, "val1\t\r\nval2\tx\r\n\t\r\n");
    }

    #[test]
    fn success_releases_everything_and_rolls_back() {
        let (session, events) = mock_session(two_columns());
        let config = config("[]", FormatOptions::default());

        export(session, "select 1", &config, || Ok(SharedSink::default())).unwrap();

        assert_eq!(
            events.borrow()[2..],
            ["close cursor", "close statement", "rollback", "close connection"]
        );
    }

    #[test]
    fn query_failure_still_rolls_back_and_never_opens_output() {
        let (session, events) = mock_session(Script {
            fail_query: true,
            ..two_columns()
        });
        let config = config("[1]", FormatOptions::default());
        let mut opened = false;

        let err = export(session, "select x", &config, || {
            opened = true;
            Ok(SharedSink::default())
        })
        .unwrap_err();

        assert!(matches!(err, ExportError::Execution(_)));
        assert!(!opened);
        assert_eq!(
            *events.borrow(),
            [
                "prepare select x",
                "bind 1 int",
                "query",
                "close statement",
                "rollback",
                "close connection"
            ]
        );
    }

    #[test]
    fn cursor_failure_mid_stream_releases_everything() {
        let (session, events) = mock_session(Script {
            fail_after: Some(1),
            ..two_columns()
        });
        let config = config("", FormatOptions::default());
        let sink_events = events.clone();

        let err = export(session, "select 1", &config, move || {
            Ok(EventSink {
                events: sink_events,
                fail_flush: false,
            })
        })
        .unwrap_err();

        assert!(matches!(err, ExportError::Execution(_)));
        assert_eq!(
            *events.borrow(),
            [
                "prepare select 1",
                "query",
                "flush writer",
                "close cursor",
                "close statement",
                "rollback",
                "close connection"
            ]
        );
    }

    #[test]
    fn writer_teardown_failure_does_not_stop_other_releases() {
        let (session, events) = mock_session(Script {
            fail_cursor_close: true,
            ..two_columns()
        });
        let config = config("", FormatOptions::default());
        let sink_events = events.clone();

        let err = export(session, "select 1", &config, move || {
            Ok(EventSink {
                events: sink_events,
                fail_flush: true,
            })
        })
        .unwrap_err();

        assert!(matches!(err, ExportError::Write(_)));
        assert_eq!(
            events.borrow()[2..],
            [
                "flush writer",
                "flush writer",
                "close cursor",
                "close statement",
                "rollback",
                "close connection"
            ]
        );
    }

    #[test]
    fn open_failure_is_a_write_error() {
        let (session, events) = mock_session(two_columns());
        let config = config("", FormatOptions::default());

        let err = export(session, "select 1", &config, || -> io::Result<SharedSink> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        })
        .unwrap_err();

        assert!(matches!(err, ExportError::Write(_)));
        assert!(events.borrow().iter().any(|event| event == "rollback"));
    }

    #[test]
    fn rollback_failure_surfaces_only_after_success() {
        let (session, _) = mock_session(Script {
            fail_rollback: true,
            ..two_columns()
        });
        let config = config("", FormatOptions::default());
        let err = export(session, "select 1", &config, || Ok(SharedSink::default())).unwrap_err();
        assert!(matches!(err, ExportError::Rollback(_)));

        let (session, _) = mock_session(Script {
            fail_rollback: true,
            fail_query: true,
            ..two_columns()
        });
        let err = export(session, "select 1", &config, || Ok(SharedSink::default())).unwrap_err();
        assert!(matches!(err, ExportError::Execution(_)));
    }
}
