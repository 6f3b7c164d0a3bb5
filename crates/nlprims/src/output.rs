use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nlprims_marshal::{type_name, Message, Value};
use serde::Serialize;
use serde_json::{Map, Number};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    msg_type: u16,
    type_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'a str>,
    length: u32,
    flags: u16,
    sequence: u32,
    pid: u32,
    fields: Map<String, serde_json::Value>,
    body_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_request_type: Option<u16>,
    timestamp: String,
}

impl<'a> MessageOutput<'a> {
    fn new(message: &'a Message) -> Self {
        let header = &message.header;
        Self {
            msg_type: header.msg_type,
            type_name: type_name(header.msg_type),
            event: message.event,
            length: header.length,
            flags: header.flags,
            sequence: header.sequence,
            pid: header.pid,
            fields: message
                .payload
                .fields()
                .iter()
                .map(|(name, value)| (name.to_string(), field_json(value)))
                .collect(),
            body_size: message.payload.body().len(),
            error: message.error.as_ref().map(ToString::to_string),
            failed_request_type: message.failed_request.as_ref().map(|m| m.msg_type()),
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_message(message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&MessageOutput::new(message))
                    .unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let header = &message.header;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "LEN", "FLAGS", "SEQ", "PID", "FIELDS", "ERROR"])
                .add_row(vec![
                    describe_type(message),
                    header.length.to_string(),
                    format!("{:#06x}", header.flags),
                    header.sequence.to_string(),
                    header.pid.to_string(),
                    fields_summary(message),
                    message
                        .error
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let header = &message.header;
            let mut line = format!(
                "{} len={} flags={:#x} seq={} pid={}",
                describe_type(message),
                header.length,
                header.flags,
                header.sequence,
                header.pid
            );
            let fields = fields_summary(message);
            if !fields.is_empty() {
                line.push(' ');
                line.push_str(&fields);
            }
            if let Some(err) = &message.error {
                line.push_str(&format!(" error=\"{err}\""));
            }
            println!("{line}");
        }
    }
}

/// Event tag when there is one, else the type name with its number.
fn describe_type(message: &Message) -> String {
    match message.event {
        Some(event) => event.to_string(),
        None => format!("{}({})", type_name(message.msg_type()), message.msg_type()),
    }
}

fn fields_summary(message: &Message) -> String {
    message
        .payload
        .fields()
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn field_json(value: &Value) -> serde_json::Value {
    match value {
        Value::U8(v) => Number::from(*v).into(),
        Value::U16(v) => Number::from(*v).into(),
        Value::U32(v) => Number::from(*v).into(),
        Value::U64(v) => Number::from(*v).into(),
        Value::I32(v) => Number::from(*v).into(),
        Value::Str(s) => s.clone().into(),
        Value::Bytes(_) => value.to_string().into(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
