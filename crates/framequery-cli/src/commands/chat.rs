//! `framequery chat`
//!
//! Reads questions line by line and answers them with chat memory.
//! `/reset` forgets the conversation, `/history` prints it, `/exit` quits.

use anyhow::Result;
use framequery_lib::core::session::QaSession;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::app::{open_pipeline, AppOptions};

/// What to do with one line of input
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Question(&'a str),
    Reset,
    History,
    Exit,
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/exit" | "/quit" => Input::Exit,
        "/reset" => Input::Reset,
        "/history" => Input::History,
        question => Input::Question(question),
    }
}

pub async fn run(options: &AppOptions) -> Result<()> {
    let pipeline = open_pipeline(options).await?;
    let mut session = pipeline.session();

    println!("Ask about the indexed video. /reset, /history, /exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Reset => {
                session.reset();
                println!("Conversation cleared.");
            }
            Input::History => print_history(&session),
            Input::Question(question) => match session.ask(question).await {
                Ok(answer) => println!(
                    "{}\n  (frame #{}, {:.2}s, score {:.4})",
                    answer.text,
                    answer.retrieval.frame.ordinal,
                    answer.retrieval.frame.timestamp_sec,
                    answer.retrieval.score
                ),
                Err(e) => eprintln!("error[{}]: {}", e.kind(), e),
            },
        }
    }
    Ok(())
}

fn print_history(session: &QaSession) {
    let turns = session.memory().entries();
    if turns.is_empty() {
        println!("(no history)");
        return;
    }
    for turn in turns {
        println!("User: {}", turn.question);
        println!("Assistant: {}", turn.answer);
    }
}
