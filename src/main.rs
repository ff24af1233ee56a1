use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use anyhow::{Context, Result};

use looplang::interpreter::run_program;
use looplang::runtime::registry::{OutputSink, Registry};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let source = match args.next() {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {path}"))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };

    let sink: OutputSink = Rc::new(RefCell::new(|line: String| println!("{line}")));
    if let Err(error) = run_program(&source, Registry::with_core(sink)) {
        eprintln!("{error}");
        std::process::exit(1);
    }
    Ok(())
}
