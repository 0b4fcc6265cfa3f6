//! Incremental transcript rendering

use std::io::{self, Write};

use popstream_client::{MessageKind, StreamMessage};

/// What has already been written for one message
#[derive(Debug, Clone, Copy, PartialEq)]
enum Shown {
    Tool { complete: bool },
    Text { chars: usize },
}

/// Prints the message list as it grows, writing only what is new.
#[derive(Debug, Default)]
pub struct Renderer {
    shown: Vec<Shown>,
    /// Whether the last write left a line open
    mid_line: bool,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the output up to date with `messages`.
    pub fn render(&mut self, messages: &[StreamMessage], out: &mut impl Write) -> io::Result<()> {
        if messages.len() < self.shown.len() {
            // store was cleared by a new run
            self.restart(out)?;
        }

        for (index, message) in messages.iter().enumerate() {
            let shown = self.shown.get(index).copied();
            match (message.kind, shown) {
                (MessageKind::ToolStart, None) => {
                    self.finish_line(out)?;
                    if message.is_complete {
                        write_completed(message, out)?;
                    } else {
                        writeln!(out, "[{}]", message.content)?;
                    }
                    self.shown.push(Shown::Tool {
                        complete: message.is_complete,
                    });
                }
                (MessageKind::ToolStart, Some(Shown::Tool { complete: false })) if message.is_complete => {
                    self.finish_line(out)?;
                    write_completed(message, out)?;
                    self.shown[index] = Shown::Tool { complete: true };
                }
                (MessageKind::AgentText, None) => {
                    self.finish_line(out)?;
                    write!(out, "{}", message.content)?;
                    self.mid_line = !message.content.ends_with('\n');
                    self.shown.push(Shown::Text {
                        chars: message.content.chars().count(),
                    });
                }
                (MessageKind::AgentText, Some(Shown::Text { chars })) => {
                    let total = message.content.chars().count();
                    if total > chars {
                        let new_text: String = message.content.chars().skip(chars).collect();
                        write!(out, "{}", new_text)?;
                        self.mid_line = !new_text.ends_with('\n');
                        self.shown[index] = Shown::Text { chars: total };
                    }
                }
                _ => {}
            }
        }

        out.flush()
    }

    /// Forget what was printed, for a run that starts from an empty store
    pub fn restart(&mut self, out: &mut impl Write) -> io::Result<()> {
        self.shown.clear();
        self.finish_line(out)
    }

    /// End a partially written text line
    pub fn finish_line(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.mid_line {
            writeln!(out)?;
            self.mid_line = false;
        }
        Ok(())
    }
}

fn write_completed(message: &StreamMessage, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "[{}]", message.content)?;
    if let Some(detail) = &message.detail {
        let preview: String = detail.chars().take(200).collect();
        writeln!(out, "  {}", preview.replace('\n', " "))?;
    }
    Ok(())
}
