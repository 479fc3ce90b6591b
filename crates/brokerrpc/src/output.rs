use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use brokerrpc_transport::Delivery;
use brokerrpc_wire::{decode_frame, routing_key, Frame};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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
struct FrameOutput<'a> {
    routing_key: &'a str,
    correlation_id: Option<&'a str>,
    src: String,
    dst: String,
    message_id: u32,
    message_type: u16,
    status_code: u32,
    body_size: usize,
    body: String,
    timestamp: String,
}

impl<'a> FrameOutput<'a> {
    fn new(frame: &Frame, key: &'a str, correlation_id: Option<&'a str>) -> Self {
        Self {
            routing_key: key,
            correlation_id,
            src: routing_key(frame.net.src_service, frame.net.src_instance),
            dst: routing_key(frame.net.dst_service, frame.net.dst_instance),
            message_id: frame.cs.message_id,
            message_type: frame.net.message_type,
            status_code: frame.cs.status_code,
            body_size: frame.body.len(),
            body: body_preview(frame.body.as_ref()),
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_frame(frame: &Frame, key: &str, correlation_id: Option<&str>, format: OutputFormat) {
    let out = FrameOutput::new(frame, key, correlation_id);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KEY", "SRC", "DST", "MSG", "STATUS", "SIZE", "BODY"])
                .add_row(vec![
                    out.routing_key.to_string(),
                    out.src.clone(),
                    out.dst.clone(),
                    out.message_id.to_string(),
                    out.status_code.to_string(),
                    out.body_size.to_string(),
                    out.body.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "key={} corr={} src={} dst={} msg={} status={} size={} body={}",
                out.routing_key,
                out.correlation_id.unwrap_or("-"),
                out.src,
                out.dst,
                out.message_id,
                out.status_code,
                out.body_size,
                out.body
            );
        }
        OutputFormat::Raw => print_raw(frame.body.as_ref()),
    }
}

/// Print a delivery, decoding it as a frame when possible.
pub fn print_delivery(delivery: &Delivery, format: OutputFormat) {
    match decode_frame(&delivery.body) {
        Ok(frame) => print_frame(&frame, &delivery.routing_key, delivery.correlation_id(), format),
        Err(err) => {
            tracing::debug!(error = %err, "delivery is not a frame");
            match format {
                OutputFormat::Raw => print_raw(delivery.body.as_ref()),
                _ => println!(
                    "key={} corr={} size={} body={}",
                    delivery.routing_key,
                    delivery.correlation_id().unwrap_or("-"),
                    delivery.body.len(),
                    body_preview(delivery.body.as_ref())
                ),
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn body_preview(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", body.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
