//! Laço interativo: uma linha por comando, saída no formato de bloco.

use std::io::{BufRead, Write};

use anyhow::Result;
use tracing::{debug, error};

use nlu_core::render::format_output;
use nlu_core::NluPipeline;

const EXIT_COMMANDS: &[&str] = &["q", "quit", "exit", "bye"];
const PROMPT: &str = "input> ";

pub fn is_exit_command(line: &str) -> bool {
    EXIT_COMMANDS.contains(&line)
}

pub fn run<R: BufRead, W: Write>(pipeline: &NluPipeline, input: R, mut output: W) -> Result<()> {
    let config = pipeline.aligner().config();

    writeln!(output, "digite 'q' para sair")?;
    write!(output, "{PROMPT}")?;
    output.flush()?;

    for line in input.lines() {
        let line = line?;
        let text = line.trim_end();
        if is_exit_command(text) {
            writeln!(output, "exit")?;
            return Ok(());
        }
        if text.is_empty() {
            continue;
        }

        match pipeline.analyze(text) {
            Ok(prediction) => {
                debug!(ms = prediction.processing_ms, "comando analisado");
                writeln!(output, "{}", format_output(config, &prediction))?;
            }
            Err(err) => error!(error = %err, "falha na análise"),
        }
        write!(output, "{PROMPT}")?;
        output.flush()?;
    }
    Ok(())
}
