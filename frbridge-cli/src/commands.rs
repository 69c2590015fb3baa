//! Command execution.

use crate::Commands;
use colored::Colorize;
use frbridge_client::Client;
use frbridge_protocol::{crc, Frame, Indicators, Source};
use serde::Serialize;

/// Executes a one-shot command against a bridge and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Override { id, base, data } => {
            let replacement = parse_hex(&data)?;
            client.submit_override(id, base, &replacement).await?;
            Ok(format!(
                "{} override for {} base {}: {}",
                "Sent".green(),
                format!("{:#05x}", id).cyan(),
                base,
                hex::encode(&replacement)
            ))
        }

        Commands::Enable => {
            client.set_injection(true).await?;
            Ok(format!("Injection {}", "enabled".green()))
        }

        Commands::Disable => {
            client.set_injection(false).await?;
            Ok(format!("Injection {}", "disabled".yellow()))
        }

        // Offline and streaming commands are handled directly in main.rs
        Commands::Decode { .. }
        | Commands::Encode { .. }
        | Commands::E2e { .. }
        | Commands::Monitor { .. }
        | Commands::Record { .. } => unreachable!(),
    }
}

/// Decodes raw frame bytes and reports the fields and CRC checks.
pub fn decode(data: &str, source: Source) -> Result<String, Box<dyn std::error::Error>> {
    let raw = parse_hex(data)?;
    let frame = Frame::decode(&raw, source)?;

    let check = |ok: bool| {
        if ok {
            "ok".green()
        } else {
            "MISMATCH".red()
        }
    };

    let mut output = format!(
        "{}\n",
        format!("Frame {:#05x} cycle {}", frame.frame_id, frame.cycle_count).bold()
    );
    output.push_str(&format!("  Source: {}\n", source.as_str()));
    output.push_str(&format!(
        "  Indicators: {:#04x}{}\n",
        frame.indicators.bits(),
        describe_indicators(frame.indicators)
    ));
    output.push_str(&format!(
        "  Payload: {} words {}\n",
        frame.payload_length_words,
        hex::encode(frame.payload())
    ));
    output.push_str(&format!(
        "  Header CRC: {:#05x} (computed {:#05x}) {}\n",
        frame.header_crc,
        frame.computed_header_crc(),
        check(frame.header_crc_matches())
    ));
    if !frame.is_null() {
        output.push_str(&format!(
            "  Frame CRC: {:#08x} (computed {:#08x}) {}\n",
            frame.frame_crc,
            frame.computed_frame_crc(),
            check(frame.frame_crc == frame.computed_frame_crc())
        ));
    }
    if raw.len() > frame.wire_len() {
        output.push_str(&format!(
            "  {}: {} trailing bytes ignored\n",
            "Note".dimmed(),
            raw.len() - frame.wire_len()
        ));
    }

    let verdict = if frame.is_valid(&raw) {
        "VALID".green()
    } else {
        "INVALID".red()
    };
    output.push_str(&format!("  Result: {}", verdict));
    Ok(output)
}

/// Builds a frame with correct CRCs and returns its hex encoding.
pub fn encode(
    id: u16,
    cycle: u8,
    payload: &str,
    indicators: u8,
) -> Result<String, Box<dyn std::error::Error>> {
    let payload = parse_hex(payload)?;
    let frame = Frame::new(
        id,
        cycle,
        Indicators::from_bits(indicators),
        &payload,
        Source::Unknown,
    )?;
    Ok(hex::encode(frame.encode()))
}

/// Computes the end-to-end CRC-8 of `data`.
pub fn e2e(init: u8, data: &str) -> Result<String, Box<dyn std::error::Error>> {
    let data = parse_hex(data)?;
    Ok(format!("{:#04x}", crc::e2e_crc(&data, init)))
}

/// JSON view of an exported frame.
#[derive(Debug, Serialize)]
pub struct FrameView {
    pub source: Source,
    pub id: u16,
    pub cycle: u8,
    pub indicators: u8,
    pub payload: String,
    pub header_crc: u16,
    pub frame_crc: u32,
}

impl From<&Frame> for FrameView {
    fn from(frame: &Frame) -> Self {
        Self {
            source: frame.source,
            id: frame.frame_id,
            cycle: frame.cycle_count,
            indicators: frame.indicators.bits(),
            payload: hex::encode(frame.payload()),
            header_crc: frame.header_crc,
            frame_crc: frame.frame_crc,
        }
    }
}

/// Formats one exported frame as a monitor line.
pub fn format_frame(frame: &Frame, json: bool) -> String {
    if json {
        return serde_json::to_string(&FrameView::from(frame))
            .unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e));
    }

    let source = match frame.source {
        Source::Ecu => "ECU".blue(),
        Source::Vehicle => "VEH".magenta(),
        Source::Unknown => "???".red(),
    };
    let null = if frame.is_null() {
        format!(" {}", "null".dimmed())
    } else {
        String::new()
    };
    format!(
        "{} {} c{:02} {}{}",
        source,
        format!("{:#05x}", frame.frame_id).cyan(),
        frame.cycle_count,
        hex::encode(frame.payload()),
        null
    )
}

fn describe_indicators(indicators: Indicators) -> String {
    let mut flags = Vec::new();
    if indicators.is_sync() {
        flags.push("sync");
    }
    if indicators.is_startup() {
        flags.push("startup");
    }
    if indicators.null_frame() {
        flags.push("null");
    }
    if indicators.has_payload_preamble() {
        flags.push("preamble");
    }
    if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    }
}

/// Parses hex bytes, allowing whitespace, `:` separators and a `0x` prefix.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(cleaned)
}

/// Parses a decimal or `0x`-prefixed hex integer.
pub fn parse_int<T>(s: &str) -> Result<T, String>
where
    T: TryFrom<u32>,
{
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    }
    .map_err(|e| format!("invalid number '{}': {}", s, e))?;
    T::try_from(value).map_err(|_| format!("{} is out of range", s))
}
