//! Interactive routed conversation on stdin/stdout.

use anyhow::Result;
use std::io::{BufRead, Write};
use tracing::warn;
use uuid::Uuid;

use crate::router::{Conversation, RouteOutcome, ToolRouter, APOLOGY};

/// One user's conversation; history is never shared between sessions.
pub struct ChatSession {
    id: Uuid,
    router: ToolRouter,
    conversation: Conversation,
}

impl ChatSession {
    pub fn new(router: ToolRouter) -> Self {
        Self {
            id: Uuid::new_v4(),
            router,
            conversation: Conversation::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Route one question. Failures are logged and answered with the
    /// apology so the caller always has something to show.
    pub async fn ask(&mut self, question: &str) -> RouteOutcome {
        match self.router.route(&mut self.conversation, question).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session = %self.id, error = %format!("{:#}", e), "chat turn failed");
                RouteOutcome {
                    answer: APOLOGY.to_string(),
                    tool: None,
                    tool_output: None,
                }
            }
        }
    }
}

/// `ekb chat`: read questions line by line until EOF or `exit`.
pub async fn run_chat(router: ToolRouter, show_tools: bool) -> Result<()> {
    let mut session = ChatSession::new(router);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    println!("Ask about engineering expertise. Type 'exit' to quit.");

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        let outcome = session.ask(question).await;
        if show_tools {
            if let Some(tool) = &outcome.tool {
                println!("[tool: {}]", tool.name());
            }
        }
        println!("{}\n", outcome.answer);
    }

    Ok(())
}
