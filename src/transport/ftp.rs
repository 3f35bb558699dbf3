//! FTP sessions over `suppaftp`, binary mode, passive transfers.

use super::{Session, TransportConfig, TransportError};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};

pub struct FtpSession {
    stream: FtpStream,
}

impl FtpSession {
    pub fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut stream = FtpStream::connect((config.host.as_str(), config.port))?;
        let password = config.password.as_deref().unwrap_or("");
        stream.login(config.user.as_str(), password).map_err(|e| match e {
            FtpError::UnexpectedResponse(_) => TransportError::Auth {
                user: config.user.clone(),
                host: config.host.clone(),
            },
            other => other.into(),
        })?;
        stream.transfer_type(FileType::Binary)?;
        Ok(Self { stream })
    }
}

impl Session for FtpSession {
    fn remote_size(&mut self, path: &str) -> Result<Option<u64>, TransportError> {
        match self.stream.size(path) {
            Ok(size) => Ok(Some(size as u64)),
            // 550: no such file
            Err(FtpError::UnexpectedResponse(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_dir(&mut self, path: &str) -> Result<(), TransportError> {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            match self.stream.mkdir(&current) {
                Ok(()) | Err(FtpError::UnexpectedResponse(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn put(&mut self, path: &str, contents: &[u8]) -> Result<(), TransportError> {
        let mut reader = contents;
        self.stream.put_file(path, &mut reader)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.stream.quit()?;
        Ok(())
    }
}
