//! XML writer for merged danmu logs.
//!
//! Output follows the BililiveRecorder layout so that players, converters
//! and this crate itself can read it back: UTF-8 with a byte-order mark, the
//! legacy bilibili header elements, an embedded stylesheet for browsers, a
//! `BililiveRecorderRecordInfo` element and then the records.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, SecondsFormat};
use tracing::debug;

use crate::error::Result;
use crate::merge::MergedLog;
use crate::node::{UTF8_BOM, XmlNode};
use crate::record::DanmuRecord;
use crate::session::RECORD_INFO_ELEMENT;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";

const XML_HEADER: &str = r##"<?xml-stylesheet type="text/xsl" href="#s"?>
<i>
<chatserver>chat.bilibili.com</chatserver>
<chatid>0</chatid>
<mission>0</mission>
<maxlimit>1000</maxlimit>
<state>0</state>
<real_name>0</real_name>
<source>0</source>
<BililiveRecorder version="Not Applicable" />
<BililiveRecorderXmlStyle><z:stylesheet version="1.0" id="s" xml:id="s" xmlns:z="http://www.w3.org/1999/XSL/Transform"><z:output method="html"/><z:template match="/"><html><meta name="viewport" content="width=device-width"/><title>Danmaku - <z:value-of select="/i/BililiveRecorderRecordInfo/@name"/></title><style>body{margin:0}h1,h2,p,table{margin-left:5px}table{border-spacing:0}td,th{border:1px solid grey;padding:1px}th{position:sticky;top:0;background:#4098de}tr:hover{background:#d9f4ff}div{overflow:auto;max-height:80vh;max-width:100vw;width:fit-content}</style><h1>Merged danmaku</h1><table><tr><td>Room</td><td><z:value-of select="/i/BililiveRecorderRecordInfo/@roomid"/></td></tr><tr><td>Streamer</td><td><z:value-of select="/i/BililiveRecorderRecordInfo/@name"/></td></tr><tr><td>Start time</td><td><z:value-of select="/i/BililiveRecorderRecordInfo/@start_time"/></td></tr><tr><td><a href="#d">Messages</a></td><td><z:value-of select="count(/i/d)"/></td></tr><tr><td><a href="#guard">Guards</a></td><td><z:value-of select="count(/i/guard)"/></td></tr><tr><td><a href="#sc">Super chats</a></td><td><z:value-of select="count(/i/sc)"/></td></tr><tr><td><a href="#gift">Gifts</a></td><td><z:value-of select="count(/i/gift)"/></td></tr></table><h2 id="d">Messages</h2><div><table><tr><th>User</th><th>Text</th><th>Params</th></tr><z:for-each select="/i/d"><tr><td><z:value-of select="@user"/></td><td><z:value-of select="."/></td><td><z:value-of select="@p"/></td></tr></z:for-each></table></div><h2 id="guard">Guards</h2><div><table><tr><th>User</th><th>Level</th><th>Count</th><th>Time</th></tr><z:for-each select="/i/guard"><tr><td><z:value-of select="@user"/></td><td><z:value-of select="@level"/></td><td><z:value-of select="@count"/></td><td><z:value-of select="@ts"/></td></tr></z:for-each></table></div><h2 id="sc">Super chats</h2><div><table><tr><th>User</th><th>Text</th><th>Duration</th><th>Price</th><th>Time</th></tr><z:for-each select="/i/sc"><tr><td><z:value-of select="@user"/></td><td><z:value-of select="."/></td><td><z:value-of select="@time"/></td><td><z:value-of select="@price"/></td><td><z:value-of select="@ts"/></td></tr></z:for-each></table></div><h2 id="gift">Gifts</h2><div><table><tr><th>User</th><th>Gift</th><th>Count</th><th>Time</th></tr><z:for-each select="/i/gift"><tr><td><z:value-of select="@user"/></td><td><z:value-of select="@giftname"/></td><td><z:value-of select="@giftcount"/></td><td><z:value-of select="@ts"/></td></tr></z:for-each></table></div></html></z:template></z:stylesheet></BililiveRecorderXmlStyle>
"##;

const XML_FOOTER: &str = "</i>\n";

/// Writer for merged danmu XML files.
///
/// # Example
///
/// ```ignore
/// use danmaku::XmlDanmuWriter;
///
/// let mut writer = XmlDanmuWriter::new(Path::new("output.xml"))?;
/// writer.write_record_info("1321846", "shanoa", &start_time)?;
/// writer.write_record(&record)?;
/// writer.finalize()?;
/// ```
pub struct XmlDanmuWriter<W: Write = BufWriter<File>> {
    path: PathBuf,
    out: Option<W>,
    record_count: u64,
}

impl XmlDanmuWriter {
    /// Create the file at `path` and write the document header.
    pub fn new(path: &Path) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Self::from_writer(path, file)
    }
}

impl<W: Write> XmlDanmuWriter<W> {
    /// Wrap an arbitrary sink. `path` is informational only.
    pub fn from_writer(path: &Path, out: W) -> Result<Self> {
        let mut writer = Self {
            path: path.to_path_buf(),
            out: Some(out),
            record_count: 0,
        };
        writer.write_header()?;
        Ok(writer)
    }

    /// Get the output path of this writer.
    pub fn output_path(&self) -> &Path {
        &self.path
    }

    /// Get the number of records written so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    fn write_header(&mut self) -> Result<()> {
        if let Some(out) = &mut self.out {
            out.write_all(UTF8_BOM)?;
            out.write_all(XML_DECLARATION.as_bytes())?;
            out.write_all(XML_HEADER.as_bytes())?;
        }
        Ok(())
    }

    /// Write the recording metadata element.
    pub fn write_record_info(
        &mut self,
        room_id: &str,
        name: &str,
        start_time: &DateTime<FixedOffset>,
    ) -> Result<()> {
        let node = XmlNode::new(RECORD_INFO_ELEMENT)
            .with_attribute("roomid", room_id)
            .with_attribute("name", name)
            .with_attribute(
                "start_time",
                start_time.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            );
        self.write_node(&node)
    }

    /// Write a single record.
    pub fn write_record(&mut self, record: &DanmuRecord) -> Result<()> {
        self.write_node(&record.render())?;
        self.record_count += 1;
        Ok(())
    }

    fn write_node(&mut self, node: &XmlNode) -> Result<()> {
        if let Some(out) = &mut self.out {
            out.write_all(node.to_xml().as_bytes())?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Write the closing tag and flush. Returns the underlying sink.
    pub fn finalize(&mut self) -> Result<Option<W>> {
        if let Some(out) = &mut self.out {
            out.write_all(XML_FOOTER.as_bytes())?;
            out.flush()?;
        }
        Ok(self.out.take())
    }
}

/// Write a whole merged log to `out`.
pub fn write_merged<W: Write>(path: &Path, out: W, log: &MergedLog) -> Result<u64> {
    let mut writer = XmlDanmuWriter::from_writer(path, out)?;
    writer.write_record_info(&log.room_id, &log.streamer_name, &log.start_time)?;
    for record in &log.records {
        writer.write_record(record)?;
    }
    writer.finalize()?;
    debug!(
        "Wrote {} records to {}",
        writer.record_count(),
        path.display()
    );
    Ok(writer.record_count())
}

/// Write a whole merged log to a new file at `path`.
pub fn write_merged_file(path: &Path, log: &MergedLog) -> Result<u64> {
    let file = BufWriter::new(File::create(path)?);
    write_merged(path, file, log)
}

/// Render a merged log to bytes.
pub fn render_merged(log: &MergedLog) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_merged(Path::new("<memory>"), &mut buf, log)?;
    Ok(buf)
}
