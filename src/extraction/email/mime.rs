//! RFC 5322 messages with MIME bodies (`.eml`).

use super::{Attachment, COMPOUND_FILE_MAGIC, EmailError, EmailParser, ParsedEmail, Recipient};
use mail_parser::{Addr, Address, DateTime, MessageParser, MimeHeaders};

/// Parser for `.eml` messages.
///
/// The body is the first text part, decoded from its transfer encoding and charset (HTML is
/// converted when the message has no plain part). Every attachment part comes back with its
/// decoded contents and the file name from its MIME headers.
#[derive(Debug, Default, Clone, Copy)]
pub struct MimeEmailParser;

impl EmailParser for MimeEmailParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedEmail, EmailError> {
        if bytes.starts_with(&COMPOUND_FILE_MAGIC) {
            return Err(EmailError::Unsupported(
                "compound-file (.msg) container passed to the MIME parser".into(),
            ));
        }
        let message = MessageParser::default()
            .parse(bytes)
            .ok_or_else(|| EmailError::Malformed("no message headers found".into()))?;

        let recipients: Vec<Recipient> = [message.to(), message.cc(), message.bcc()]
            .into_iter()
            .flatten()
            .flat_map(mailboxes)
            .map(recipient)
            .collect();
        let attachments = message
            .attachments()
            .map(|part| {
                let name = part.attachment_name().map(str::to_string);
                Attachment {
                    display_name: name.clone().unwrap_or_default(),
                    long_filename: name,
                    data: part.contents().to_vec(),
                }
            })
            .collect();

        Ok(ParsedEmail {
            body: message
                .body_text(0)
                .map(|text| text.replace("\r\n", "\n").trim_end().to_string())
                .unwrap_or_default(),
            sender: message
                .from()
                .and_then(|from| mailboxes(from).into_iter().next())
                .map(|addr| recipient(addr).mailbox())
                .unwrap_or_default(),
            date: message.date().map(format_date).unwrap_or_default(),
            subject: message.subject().unwrap_or_default().to_string(),
            to: message.to().map(address_line).unwrap_or_default(),
            cc: optional_line(message.cc()),
            bcc: optional_line(message.bcc()),
            recipients,
            attachments,
        })
    }
}

fn mailboxes<'a, 'x>(address: &'a Address<'x>) -> Vec<&'a Addr<'x>> {
    match address {
        Address::List(list) => list.iter().collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .collect(),
    }
}

fn recipient(addr: &Addr<'_>) -> Recipient {
    let email = addr.address.as_deref().unwrap_or_default();
    let email = email.trim().to_string();
    let name = addr
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map_or_else(|| email.clone(), str::to_string);
    Recipient { name, email }
}

fn address_line(address: &Address<'_>) -> String {
    mailboxes(address)
        .into_iter()
        .map(|addr| recipient(addr).mailbox())
        .collect::<Vec<_>>()
        .join(", ")
}

fn optional_line(address: Option<&Address<'_>>) -> Option<String> {
    address.map(address_line).filter(|line| !line.is_empty())
}

// Wall-clock time as written by the sender; the zone offset is dropped.
fn format_date(date: &DateTime) -> String {
    let (year, month, day) = (date.year, date.month, date.day);
    let (hour, minute, second) = (date.hour, date.minute, date.second);
    format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &str = "From: Ana Ruiz <ana@example.com>\r\n\
To: \"Lee, Sam\" <sam@example.com>, ops@example.com\r\n\
Cc: Kim <kim@example.com>\r\n\
Subject: Weekly status\r\n\
Date: Tue, 4 Mar 2025 10:00:00 -0500\r\n\
\r\n\
Body line one\r\nBody line two\r\n";

    #[test]
    fn parses_headers_and_body() {
        let parsed = MimeEmailParser.parse(MESSAGE.as_bytes()).expect("parsed");
        assert_eq!(parsed.sender, "Ana Ruiz <ana@example.com>");
        assert_eq!(parsed.subject, "Weekly status");
        assert_eq!(parsed.date, "2025-03-04 10:00:00");
        assert_eq!(parsed.body, "Body line one\nBody line two");
        assert_eq!(parsed.cc.as_deref(), Some("Kim <kim@example.com>"));
        assert!(parsed.bcc.is_none());
        let emails: Vec<_> = parsed.recipients.iter().map(|r| r.email.as_str()).collect();
        assert_eq!(
            emails,
            vec!["sam@example.com", "ops@example.com", "kim@example.com"]
        );
        assert_eq!(parsed.recipients[0].name, "Lee, Sam");
        assert_eq!(parsed.recipients[1].name, "ops@example.com");
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn rejects_compound_file_containers() {
        let mut bytes = COMPOUND_FILE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0xA1, 0xB1, 0x1A, 0xE1]);
        assert!(matches!(
            MimeEmailParser.parse(&bytes),
            Err(EmailError::Unsupported(_))
        ));
    }
}
