//! Outlook messages (`.msg`).
//!
//! A `.msg` file is a compound file whose streams hold MAPI properties. Variable-length values
//! live in `__substg1.0_{id}{type}` streams; fixed-size ones such as the sent time are packed
//! into a `__properties_version1.0` stream. Recipients and attachments are child storages with
//! the same layout.

use super::{Attachment, EmailError, EmailParser, ParsedEmail, Recipient};
use cfb::CompoundFile;
use std::io::{Cursor, Read};
use time::OffsetDateTime;

type Container<'a> = CompoundFile<Cursor<&'a [u8]>>;

const PT_STRING8: u16 = 0x001E;
const PT_UNICODE: u16 = 0x001F;
const PT_SYSTIME: u16 = 0x0040;
const PT_BINARY: u16 = 0x0102;

const PR_SUBJECT: u16 = 0x0037;
const PR_CLIENT_SUBMIT_TIME: u16 = 0x0039;
const PR_SENDER_NAME: u16 = 0x0C1A;
const PR_SENDER_EMAIL_ADDRESS: u16 = 0x0C1F;
const PR_DISPLAY_BCC: u16 = 0x0E02;
const PR_DISPLAY_CC: u16 = 0x0E03;
const PR_DISPLAY_TO: u16 = 0x0E04;
const PR_MESSAGE_DELIVERY_TIME: u16 = 0x0E06;
const PR_BODY: u16 = 0x1000;
const PR_DISPLAY_NAME: u16 = 0x3001;
const PR_EMAIL_ADDRESS: u16 = 0x3003;
const PR_ATTACH_DATA_BIN: u16 = 0x3701;
const PR_ATTACH_FILENAME: u16 = 0x3704;
const PR_ATTACH_LONG_FILENAME: u16 = 0x3707;
const PR_SMTP_ADDRESS: u16 = 0x39FE;
const PR_SENDER_SMTP_ADDRESS: u16 = 0x5D01;

const PROPERTIES_STREAM: &str = "/__properties_version1.0";
/// The top-level property stream starts with a 32-byte header; each entry is 16 bytes.
const ROOT_PROPERTIES_HEADER_LEN: usize = 32;
const PROPERTY_ENTRY_LEN: usize = 16;

const RECIPIENT_STORAGE_PREFIX: &str = "__recip_version1.0_";
const ATTACHMENT_STORAGE_PREFIX: &str = "__attach_version1.0_";

/// Seconds between the FILETIME epoch (1601-01-01) and the Unix epoch.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

/// Parser for Outlook `.msg` compound files.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutlookMsgParser;

impl EmailParser for OutlookMsgParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedEmail, EmailError> {
        let mut file = CompoundFile::open(Cursor::new(bytes))
            .map_err(|error| EmailError::Malformed(format!("not a compound file: {error}")))?;
        let (recipient_storages, attachment_storages) = child_storages(&mut file)?;

        let sender_name = first_string(&mut file, "", &[PR_SENDER_NAME])?;
        let sender_email = first_string(
            &mut file,
            "",
            &[PR_SENDER_SMTP_ADDRESS, PR_SENDER_EMAIL_ADDRESS],
        )?;
        let sender = match (sender_name, sender_email) {
            (Some(name), Some(email)) => Recipient { name, email }.mailbox(),
            (Some(value), None) | (None, Some(value)) => value,
            (None, None) => String::new(),
        };

        let mut recipients = Vec::with_capacity(recipient_storages.len());
        for storage in &recipient_storages {
            let email = first_string(&mut file, storage, &[PR_SMTP_ADDRESS, PR_EMAIL_ADDRESS])?
                .unwrap_or_default();
            let name = first_string(&mut file, storage, &[PR_DISPLAY_NAME])?
                .unwrap_or_else(|| email.clone());
            recipients.push(Recipient { name, email });
        }

        let mut attachments = Vec::with_capacity(attachment_storages.len());
        for storage in &attachment_storages {
            let long_filename = first_string(&mut file, storage, &[PR_ATTACH_LONG_FILENAME])?;
            let display_name = first_string(
                &mut file,
                storage,
                &[PR_DISPLAY_NAME, PR_ATTACH_LONG_FILENAME, PR_ATTACH_FILENAME],
            )?
            .unwrap_or_default();
            let data_path = property_path(storage, PR_ATTACH_DATA_BIN, PT_BINARY);
            let Some(data) = read_stream(&mut file, &data_path)? else {
                tracing::info!(
                    attachment = %display_name,
                    "Skipping attachment without binary data"
                );
                continue;
            };
            attachments.push(Attachment {
                display_name,
                long_filename,
                data,
            });
        }

        let body = root_string(&mut file, PR_BODY)?;
        Ok(ParsedEmail {
            body: body.replace("\r\n", "\n").trim_end().to_string(),
            sender,
            date: sent_time(&mut file)?.unwrap_or_default(),
            subject: root_string(&mut file, PR_SUBJECT)?,
            to: root_string(&mut file, PR_DISPLAY_TO)?,
            cc: first_string(&mut file, "", &[PR_DISPLAY_CC])?,
            bcc: first_string(&mut file, "", &[PR_DISPLAY_BCC])?,
            recipients,
            attachments,
        })
    }
}

fn malformed(path: &str) -> impl FnOnce(std::io::Error) -> EmailError + '_ {
    move |error| EmailError::Malformed(format!("unreadable entry {path}: {error}"))
}

fn trim_nul(value: &str) -> String {
    value.trim_end_matches('\0').to_string()
}

fn property_path(storage: &str, id: u16, kind: u16) -> String {
    format!("{storage}/__substg1.0_{id:04X}{kind:04X}")
}

/// Recipient and attachment storages below the root, in storage-name order.
fn child_storages(file: &mut Container<'_>) -> Result<(Vec<String>, Vec<String>), EmailError> {
    let entries = file.read_storage("/").map_err(malformed("/"))?;
    let mut recipients = Vec::new();
    let mut attachments = Vec::new();
    for entry in entries.filter(|entry| entry.is_storage()) {
        let name = entry.name();
        if name.starts_with(RECIPIENT_STORAGE_PREFIX) {
            recipients.push(format!("/{name}"));
        } else if name.starts_with(ATTACHMENT_STORAGE_PREFIX) {
            attachments.push(format!("/{name}"));
        }
    }
    recipients.sort();
    attachments.sort();
    Ok((recipients, attachments))
}

fn read_stream(file: &mut Container<'_>, path: &str) -> Result<Option<Vec<u8>>, EmailError> {
    if !file.is_stream(path) {
        return Ok(None);
    }
    let mut stream = file.open_stream(path).map_err(malformed(path))?;
    let mut data = Vec::new();
    stream.read_to_end(&mut data).map_err(malformed(path))?;
    Ok(Some(data))
}

fn read_string(
    file: &mut Container<'_>,
    storage: &str,
    id: u16,
) -> Result<Option<String>, EmailError> {
    if let Some(data) = read_stream(file, &property_path(storage, id, PT_UNICODE))? {
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return Ok(Some(trim_nul(&String::from_utf16_lossy(&units))));
    }
    let narrow = read_stream(file, &property_path(storage, id, PT_STRING8))?;
    Ok(narrow.map(|data| trim_nul(&String::from_utf8_lossy(&data))))
}

fn root_string(file: &mut Container<'_>, id: u16) -> Result<String, EmailError> {
    Ok(first_string(file, "", &[id])?.unwrap_or_default())
}

/// First non-empty string among `ids`.
fn first_string(
    file: &mut Container<'_>,
    storage: &str,
    ids: &[u16],
) -> Result<Option<String>, EmailError> {
    for &id in ids {
        let value = read_string(file, storage, id)?;
        if let Some(value) = value.filter(|value| !value.is_empty()) {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Submit time, falling back to the delivery time.
fn sent_time(file: &mut Container<'_>) -> Result<Option<String>, EmailError> {
    let Some(data) = read_stream(file, PROPERTIES_STREAM)? else {
        return Ok(None);
    };
    let entries = data.get(ROOT_PROPERTIES_HEADER_LEN..).unwrap_or_default();
    let mut delivered = None;
    for entry in entries.chunks_exact(PROPERTY_ENTRY_LEN) {
        let tag = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        let (id, kind) = ((tag >> 16) as u16, (tag & 0xFFFF) as u16);
        if kind != PT_SYSTIME {
            continue;
        }
        let mut value = [0u8; 8];
        value.copy_from_slice(&entry[8..16]);
        let stamp = format_filetime(u64::from_le_bytes(value));
        match id {
            PR_CLIENT_SUBMIT_TIME => return Ok(stamp),
            PR_MESSAGE_DELIVERY_TIME => delivered = stamp,
            _ => {}
        }
    }
    Ok(delivered)
}

fn format_filetime(filetime: u64) -> Option<String> {
    let seconds = i64::try_from(filetime / 10_000_000).ok()? - FILETIME_UNIX_OFFSET_SECS;
    let stamp = OffsetDateTime::from_unix_timestamp(seconds).ok()?;
    let (year, month, day) = (stamp.year(), u8::from(stamp.month()), stamp.day());
    let (hour, minute, second) = stamp.to_hms();
    Some(format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::email::EmailContainerParser;
    use std::io::Write;

    // 2025-03-04 15:00:00 UTC
    const SUBMIT_FILETIME: u64 = 133_855_740_000_000_000;

    fn utf16(value: &str) -> Vec<u8> {
        value.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn write_stream(file: &mut CompoundFile<Cursor<Vec<u8>>>, path: &str, data: &[u8]) {
        let mut stream = file.create_stream(path).expect("create stream");
        stream.write_all(data).expect("write stream");
        stream.flush().expect("flush stream");
    }

    fn sample_message() -> Vec<u8> {
        let mut file = CompoundFile::create(Cursor::new(Vec::new())).expect("create");
        let string = |id| property_path("", id, PT_UNICODE);
        write_stream(&mut file, &string(PR_SUBJECT), &utf16("Budget review"));
        write_stream(&mut file, &string(PR_BODY), &utf16("See attached.\r\n"));
        write_stream(&mut file, &string(PR_SENDER_NAME), &utf16("Ana Ruiz"));
        write_stream(
            &mut file,
            &string(PR_SENDER_SMTP_ADDRESS),
            &utf16("ana@example.com"),
        );
        write_stream(&mut file, &string(PR_DISPLAY_TO), &utf16("Sam Lee"));

        let mut properties = vec![0u8; ROOT_PROPERTIES_HEADER_LEN];
        let tag = (u32::from(PR_CLIENT_SUBMIT_TIME) << 16) | u32::from(PT_SYSTIME);
        properties.extend_from_slice(&tag.to_le_bytes());
        properties.extend_from_slice(&0u32.to_le_bytes());
        properties.extend_from_slice(&SUBMIT_FILETIME.to_le_bytes());
        write_stream(&mut file, PROPERTIES_STREAM, &properties);

        let recipient = "/__recip_version1.0_#00000000";
        file.create_storage(recipient).expect("recipient storage");
        let recipient_string = |id| property_path(recipient, id, PT_UNICODE);
        write_stream(
            &mut file,
            &recipient_string(PR_DISPLAY_NAME),
            &utf16("Sam Lee"),
        );
        write_stream(
            &mut file,
            &recipient_string(PR_SMTP_ADDRESS),
            &utf16("sam@example.com"),
        );

        let named = "/__attach_version1.0_#00000000";
        file.create_storage(named).expect("attachment storage");
        write_stream(
            &mut file,
            &property_path(named, PR_ATTACH_LONG_FILENAME, PT_UNICODE),
            &utf16("budget.xlsx"),
        );
        write_stream(
            &mut file,
            &property_path(named, PR_ATTACH_DATA_BIN, PT_BINARY),
            b"PK\x03\x04",
        );

        let inline = "/__attach_version1.0_#00000001";
        file.create_storage(inline).expect("inline storage");
        write_stream(
            &mut file,
            &property_path(inline, PR_DISPLAY_NAME, PT_UNICODE),
            &utf16("image001.png"),
        );
        write_stream(
            &mut file,
            &property_path(inline, PR_ATTACH_DATA_BIN, PT_BINARY),
            &[0x89, 0x50],
        );

        file.flush().expect("flush");
        file.into_inner().into_inner()
    }

    #[test]
    fn reads_message_properties_recipients_and_attachments() {
        let parsed = OutlookMsgParser.parse(&sample_message()).expect("parsed");

        assert_eq!(parsed.subject, "Budget review");
        assert_eq!(parsed.body, "See attached.");
        assert_eq!(parsed.sender, "Ana Ruiz <ana@example.com>");
        assert_eq!(parsed.date, "2025-03-04 15:00:00");
        assert_eq!(parsed.to, "Sam Lee");
        assert!(parsed.cc.is_none());
        assert_eq!(
            parsed.recipients,
            vec![Recipient {
                name: "Sam Lee".into(),
                email: "sam@example.com".into(),
            }]
        );

        assert_eq!(parsed.attachments.len(), 2);
        assert_eq!(parsed.attachments[0].display_name, "budget.xlsx");
        assert_eq!(
            parsed.attachments[0].long_filename.as_deref(),
            Some("budget.xlsx")
        );
        assert_eq!(parsed.attachments[0].data, b"PK\x03\x04".to_vec());
        assert_eq!(parsed.attachments[1].display_name, "image001.png");
        assert!(parsed.attachments[1].long_filename.is_none());
    }

    #[test]
    fn container_parser_routes_compound_files_here() {
        let bytes = sample_message();
        let parsed = EmailContainerParser.parse(&bytes).expect("parsed");
        assert_eq!(parsed.subject, "Budget review");
    }

    #[test]
    fn rejects_bytes_that_are_not_a_compound_file() {
        assert!(matches!(
            OutlookMsgParser.parse(b"From: a@example.com\n\nhi"),
            Err(EmailError::Malformed(_))
        ));
    }

    #[test]
    fn filetime_converts_to_wall_clock() {
        assert_eq!(
            format_filetime(SUBMIT_FILETIME).as_deref(),
            Some("2025-03-04 15:00:00")
        );
    }
}
