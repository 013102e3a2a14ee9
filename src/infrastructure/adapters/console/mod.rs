//! Console adapter for development/testing

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;

use crate::domain::entities::{Message, User};
use crate::domain::traits::{Bot, BotInfo};
use crate::application::errors::BotError;
use crate::application::messaging::MessageParser;

/// Chat id and sender id of everything typed on the console
pub const CONSOLE_ID: &str = "console";

/// Console bot adapter for local development.
///
/// Every line read is a message from the `console` user; replies are
/// written as `[BOT] text`.
pub struct ConsoleAdapter<R = BufReader<tokio::io::Stdin>, W = tokio::io::Stdout> {
    info: BotInfo,
    parser: MessageParser,
    input: Mutex<Lines<R>>,
    output: Mutex<W>,
}

impl ConsoleAdapter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_io(prefix, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> ConsoleAdapter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn with_io(prefix: impl Into<String>, input: R, output: W) -> Self {
        Self {
            info: BotInfo {
                id: CONSOLE_ID.to_string(),
                name: "swapbot".to_string(),
                username: CONSOLE_ID.to_string(),
            },
            parser: MessageParser::new(prefix),
            input: Mutex::new(input.lines()),
            output: Mutex::new(output),
        }
    }

    pub fn into_output(self) -> W {
        self.output.into_inner()
    }
}

#[async_trait]
impl<R, W> Bot for ConsoleAdapter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn start(&self) -> Result<(), BotError> {
        tracing::info!("Starting console bot (dev mode)");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Vec<Message>>, BotError> {
        let line = self.input
            .lock()
            .await
            .next_line()
            .await
            .map_err(|e| BotError::Internal(format!("Failed to read stdin: {}", e)))?;

        Ok(line.map(|text| {
            let sender = User::new(CONSOLE_ID).with_username(CONSOLE_ID);
            vec![self.parser.parse(CONSOLE_ID, text, Some(sender)).with_platform("console")]
        }))
    }

    async fn send_message(&self, _chat_id: &str, text: &str) -> Result<String, BotError> {
        let mut output = self.output.lock().await;
        output
            .write_all(format!("[BOT] {}\n", text).as_bytes())
            .await
            .map_err(|e| BotError::Internal(format!("Failed to write stdout: {}", e)))?;
        output
            .flush()
            .await
            .map_err(|e| BotError::Internal(format!("Failed to write stdout: {}", e)))?;
        Ok("console_msg".to_string())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }
}
