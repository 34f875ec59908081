//! Email container extraction.
//!
//! The body becomes the document text; sender, recipients, subject, and date go into
//! [`EmailProperties`]. Named attachments are written to an [`AttachmentStore`] under
//! `email_attachments/{message base name}/{attachment name}` so a downstream run can pick them
//! up as documents of their own.

pub mod mime;
pub mod msg;

use crate::processing::types::EmailProperties;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use mime::MimeEmailParser;
pub use msg::OutlookMsgParser;

/// Leading bytes of a compound-file (Outlook `.msg`) container.
pub(crate) const COMPOUND_FILE_MAGIC: [u8; 4] = [0xD0, 0xCF, 0x11, 0xE0];

/// Errors raised while reading an email container or saving its attachments.
#[derive(Debug, Error)]
pub enum EmailError {
    /// The container format is not understood by the configured parser.
    #[error("Unsupported email container: {0}")]
    Unsupported(String),
    /// The message could not be parsed.
    #[error("Malformed email: {0}")]
    Malformed(String),
    /// Writing an attachment failed.
    #[error("Failed to store attachment '{path}': {source}")]
    Attachment {
        /// Destination of the attachment.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A mailbox from an address header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Display name, or the address when none was given.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Recipient {
    /// `Name <address>`, or the bare address when the name adds nothing.
    pub fn mailbox(&self) -> String {
        if self.name.is_empty() || self.name == self.email {
            self.email.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

/// An attachment carried by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Name shown to the reader; used as the stored file name.
    pub display_name: String,
    /// Full file name; attachments without one (inline images, signatures) are skipped.
    pub long_filename: Option<String>,
    /// Raw attachment bytes.
    pub data: Vec<u8>,
}

/// Parsed message contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    /// Plain-text body.
    pub body: String,
    /// Sender.
    pub sender: String,
    /// Sent date, `YYYY-MM-DD HH:MM:SS`.
    pub date: String,
    /// Subject line.
    pub subject: String,
    /// `To` line.
    pub to: String,
    /// `Cc` line.
    pub cc: Option<String>,
    /// `Bcc` line.
    pub bcc: Option<String>,
    /// Every recipient across `To`, `Cc`, and `Bcc`.
    pub recipients: Vec<Recipient>,
    /// Attachments in message order.
    pub attachments: Vec<Attachment>,
}

/// Parser for one email container format.
pub trait EmailParser: Send + Sync {
    /// Parse raw container bytes.
    fn parse(&self, bytes: &[u8]) -> Result<ParsedEmail, EmailError>;
}

/// Destination for extracted attachments.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Write `data` at `path`, replacing anything already there.
    async fn put(&self, path: &str, data: &[u8]) -> Result<(), EmailError>;
}

/// Parser that picks the container format from the leading bytes: compound files go to
/// [`OutlookMsgParser`], everything else to [`MimeEmailParser`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailContainerParser;

impl EmailParser for EmailContainerParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedEmail, EmailError> {
        if bytes.starts_with(&COMPOUND_FILE_MAGIC) {
            OutlookMsgParser.parse(bytes)
        } else {
            MimeEmailParser.parse(bytes)
        }
    }
}

/// [`AttachmentStore`] writing below a local directory.
#[derive(Debug, Clone)]
pub struct FsAttachmentStore {
    root: PathBuf,
}

impl FsAttachmentStore {
    /// Store attachments below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    async fn put(&self, path: &str, data: &[u8]) -> Result<(), EmailError> {
        let target = self.root.join(path);
        let to_error = |source| EmailError::Attachment {
            path: path.to_string(),
            source,
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(to_error)?;
        }
        tokio::fs::write(&target, data).await.map_err(to_error)
    }
}

/// Parse an email container, persist its named attachments, and return body and properties.
pub async fn extract_email(
    parser: &dyn EmailParser,
    attachments: &dyn AttachmentStore,
    bytes: &[u8],
    filename: &str,
) -> Result<(String, EmailProperties), EmailError> {
    let parsed = parser.parse(bytes)?;
    let (recipient_names, recipient_emails) = parsed
        .recipients
        .iter()
        .map(|recipient| (recipient.name.clone(), recipient.email.clone()))
        .unzip();

    let mut properties = EmailProperties {
        sender: parsed.sender,
        email_date: parsed.date,
        email_subject: parsed.subject,
        to: parsed.to,
        cc: parsed.cc,
        bcc: parsed.bcc,
        recipient_names,
        recipient_emails,
        attachment_filenames: None,
        attachment_blob_names: None,
    };

    if !parsed.attachments.is_empty() {
        let base = Path::new(filename)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        let mut names = Vec::new();
        let mut blob_names = Vec::new();
        for attachment in parsed.attachments {
            if attachment.long_filename.is_none() {
                tracing::info!("Skipping attachment without a file name");
                continue;
            }
            let blob_name = format!("email_attachments/{base}/{}", attachment.display_name);
            attachments.put(&blob_name, &attachment.data).await?;
            tracing::info!(attachment = %blob_name, "Uploaded attachment");
            names.push(attachment.display_name);
            blob_names.push(blob_name);
        }
        properties.attachment_filenames = Some(names);
        properties.attachment_blob_names = Some(blob_names);
    }

    Ok((parsed.body, properties))
}
