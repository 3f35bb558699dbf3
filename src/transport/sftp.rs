//! SFTP sessions over `ssh2`.
//!
//! Authentication order: private key file when `key` is set (its passphrase
//! is `password`), then password, then the SSH agent.

use super::{Session, TransportConfig, TransportError};
use std::io::Write;
use std::net::TcpStream;
use std::path::Path;

pub struct SftpSession {
    // Kept alive for the lifetime of the SFTP channel
    _ssh: ssh2::Session,
    sftp: ssh2::Sftp,
}

impl SftpSession {
    pub fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port))?;
        let mut ssh = ssh2::Session::new()?;
        ssh.set_tcp_stream(tcp);
        ssh.handshake()?;

        let user = config.user.as_str();
        match (&config.key, &config.password) {
            (Some(key), passphrase) => ssh.userauth_pubkey_file(user, None, key, passphrase.as_deref())?,
            (None, Some(password)) => ssh.userauth_password(user, password)?,
            (None, None) => ssh.userauth_agent(user)?,
        }
        if !ssh.authenticated() {
            return Err(TransportError::Auth {
                user: config.user.clone(),
                host: config.host.clone(),
            });
        }

        let sftp = ssh.sftp()?;
        Ok(Self { _ssh: ssh, sftp })
    }
}

impl Session for SftpSession {
    fn remote_size(&mut self, path: &str) -> Result<Option<u64>, TransportError> {
        match self.sftp.stat(Path::new(path)) {
            Ok(stat) => Ok(stat.size),
            Err(_) => Ok(None),
        }
    }

    fn ensure_dir(&mut self, path: &str) -> Result<(), TransportError> {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            let dir = Path::new(&current);
            if self.sftp.stat(dir).is_err() {
                self.sftp.mkdir(dir, 0o755)?;
            }
        }
        Ok(())
    }

    fn put(&mut self, path: &str, contents: &[u8]) -> Result<(), TransportError> {
        let mut remote = self.sftp.create(Path::new(path))?;
        remote.write_all(contents)?;
        Ok(())
    }
}
