use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Read};

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read text from stdin")?;
    Ok(buffer)
}

/// Text to talk: the positional argument, `--file` (`-` for stdin), or stdin
pub fn get_input_text(matches: &clap::ArgMatches) -> Result<String> {
    let text = if let Some(text) = matches.get_one::<String>("text") {
        text.clone()
    } else if let Some(file_path) = matches.get_one::<String>("file") {
        if file_path == "-" {
            read_stdin()?
        } else {
            fs::read_to_string(file_path)
                .with_context(|| format!("Failed to read {}", file_path))?
        }
    } else {
        read_stdin()?
    };
    Ok(text.trim().to_string())
}
