use std::io::{self, Write};

use encoding_rs::{EncoderResult, Encoding, UTF_8, UTF_16BE, UTF_16LE};

use crate::FormatOptions;
use crate::release::Release;

/// 将若干单元格按分隔符拼接成一行，行首不会出现分隔符
pub fn render_line<'a, I>(
    cells: I,
    separator: &str,
) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut line = String::new();
    for (idx, cell) in cells.into_iter().enumerate() {
        if idx > 0 {
            line.push_str(separator);
        }
        line.push_str(cell);
    }
    line
}

/// 按输出编码逐行写出结果集
pub struct RowWriter<W: Write> {
    out: W,
    encoding: &'static Encoding,
    format: FormatOptions,
    buf: Vec<u8>,
    rows: u64,
}

impl<W: Write> RowWriter<W> {
    pub fn new(
        out: W,
        encoding: &'static Encoding,
        format: &FormatOptions,
    ) -> Self {
        Self {
            out,
            encoding,
            format: format.clone(),
            buf: Vec::with_capacity(1024),
            rows: 0,
        }
    }

    /// 写出表头（列标签），不计入行数
    pub fn write_header(
        &mut self,
        labels: &[String],
    ) -> io::Result<()> {
        let line = render_line(labels.iter().map(String::as_str), &self.format.separator);
        self.write_line(&line)
    }

    pub fn write_row(
        &mut self,
        cells: &[Option<String>],
    ) -> io::Result<()> {
        let null_text = self.format.null_text.as_str();
        let line = render_line(
            cells.iter().map(|cell| cell.as_deref().unwrap_or(null_text)),
            &self.format.separator,
        );
        self.write_line(&line)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// 已写出的数据行数
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    fn write_line(
        &mut self,
        line: &str,
    ) -> io::Result<()> {
        self.buf.clear();
        encode_into(self.encoding, line, &mut self.buf);
        encode_into(self.encoding, self.format.line_break.as_str(), &mut self.buf);
        self.out.write_all(&self.buf)
    }
}

impl<W: Write> Release for RowWriter<W> {
    type Error = io::Error;

    fn release(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// 无法映射到目标编码的字符写为 `?`
fn encode_into(
    encoding: &'static Encoding,
    text: &str,
    dst: &mut Vec<u8>,
) {
    if encoding == UTF_8 {
        dst.extend_from_slice(text.as_bytes());
        return;
    }
    // encoding_rs 的 UTF-16 编码器输出的是 UTF-8，需要单独处理
    if encoding == UTF_16LE {
        text.encode_utf16().for_each(|unit| dst.extend_from_slice(&unit.to_le_bytes()));
        return;
    }
    if encoding == UTF_16BE {
        text.encode_utf16().for_each(|unit| dst.extend_from_slice(&unit.to_be_bytes()));
        return;
    }

    let mut encoder = encoding.new_encoder();
    let mut src = text;
    dst.reserve(text.len());
    loop {
        let (result, read) = encoder.encode_from_utf8_to_vec_without_replacement(src, dst, true);
        src = &src[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => {
                let extra = encoder
                    .max_buffer_length_from_utf8_without_replacement(src.len())
                    .unwrap_or(src.len() * 4 + 16);
                dst.reserve(extra);
            }
            EncoderResult::Unmappable(_) => dst.push(b'?'),
        }
    }
}
