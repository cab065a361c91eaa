//! Telegram Bot API sender (`POST /bot<token>/sendMessage`).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use camwatch_common::config::TelegramConfig;

use crate::queue::MessageSender;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

pub struct TelegramNotifier {
    client: reqwest::blocking::Client,
    url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Cannot create HTTP client")?;
        Ok(Self {
            client,
            url: send_message_url(&config.api_base, &config.bot_token),
            chat_id: config.chat_id.clone(),
        })
    }
}

impl MessageSender for TelegramNotifier {
    fn send(&self, text: &str) -> Result<()> {
        debug!("Sending Telegram message: {text}");
        let resp = self
            .client
            .post(&self.url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .context("POST sendMessage")?;

        if !resp.status().is_success() {
            anyhow::bail!("sendMessage returned {}", resp.status());
        }
        info!("Message sent to Telegram");
        Ok(())
    }
}

fn send_message_url(api_base: &str, token: &str) -> String {
    format!("{}/bot{token}/sendMessage", api_base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;

    #[test]
    fn test_send_message_url() {
        assert_eq!(
            send_message_url("https://api.telegram.org/", "123:abc"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    /// Accept one request, return its head and body, answer with `status`.
    fn serve_once(status: &'static str) -> (String, std::thread::JoinHandle<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
                head.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}"
            )
            .unwrap();
            (head, String::from_utf8(body).unwrap())
        });
        (base, handle)
    }

    fn config(api_base: String) -> TelegramConfig {
        TelegramConfig {
            bot_token: "42:token".into(),
            chat_id: "-100".into(),
            api_base,
        }
    }

    #[test]
    fn test_send_posts_json() {
        let (base, server) = serve_once("200 OK");
        let notifier = TelegramNotifier::new(&config(base)).unwrap();
        notifier.send("hello \u{1f6a8}").unwrap();

        let (head, body) = server.join().unwrap();
        assert!(head.starts_with("POST /bot42:token/sendMessage HTTP/1.1"));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["chat_id"], "-100");
        assert_eq!(json["text"], "hello \u{1f6a8}");
    }

    #[test]
    fn test_error_status_is_failure() {
        let (base, server) = serve_once("502 Bad Gateway");
        let notifier = TelegramNotifier::new(&config(base)).unwrap();
        assert!(notifier.send("x").is_err());
        server.join().unwrap();
    }
}
