use async_trait::async_trait;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    fn render(&self) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nDate: {}\n\n{}\n",
            self.from,
            self.to,
            self.subject,
            chrono::Utc::now().to_rfc2822(),
            self.body
        )
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Writes each message to its own file, one directory per process.
pub struct FileMailer {
    dir: PathBuf,
    seq: AtomicU64,
}

impl FileMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), seq: AtomicU64::new(0) }
    }
}

#[async_trait]
impl Mailer for FileMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}-{n}.log", chrono::Utc::now().format("%Y%m%d-%H%M%S"), std::process::id());
        let path = self.dir.join(name);
        tokio::fs::write(&path, email.render()).await?;
        info!("mail to={} written to {}", email.to, path.display());
        Ok(())
    }
}

/// Logs messages instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        info!("mail to={} subject={:?}\n{}", email.to, email.subject, email.body);
        Ok(())
    }
}

/// An empty `MAIL_DIR` selects the logging mailer.
pub fn build_mailer(config: &AppConfig) -> Arc<dyn Mailer> {
    match &config.mail_dir {
        Some(dir) => Arc::new(FileMailer::new(dir.clone())),
        None => {
            warn!("MAIL_DIR is empty; confirmation codes will only be logged");
            Arc::new(LogMailer)
        }
    }
}

pub fn confirmation_email(from: &str, to: &str, code: &str) -> Email {
    Email {
        from: from.to_string(),
        to: to.to_string(),
        subject: "ratedb signup".to_string(),
        body: format!("Your confirmation code: {code}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn file_mailer_writes_one_file_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = FileMailer::new(dir.path().join("out"));
        let email = confirmation_email("admin@ratedb.local", "a@example.com", "abc-123");
        mailer.send(&email).await.unwrap();
        mailer.send(&email).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path().join("out")).unwrap().collect();
        assert_eq!(files.len(), 2);
        let body = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(body.contains("To: a@example.com"));
        assert!(body.contains("abc-123"));
    }
}
