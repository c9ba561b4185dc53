//! `doc man|md --output DIR` (`spec.md` §6 CLI surface): renders the
//! fully assembled command tree — static flags plus every registered
//! client's dynamic subcommands — to disk, one file per node.
//!
//! Man pages are grounded in `clap_mangen`, the ecosystem's standard
//! renderer for a `clap::Command` tree (not something the teacher needs,
//! since its CLI is a single static `clap::Parser` struct with no
//! generated docs step); markdown has no comparably dominant crate so it
//! is rendered by a direct walk instead of pulling in another dependency
//! for it.

use std::fs;
use std::io::Write;
use std::path::Path;

use clap::Command;

pub fn write_man(cmd: &Command, output: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(output)?;
    write_man_recursive(cmd, output)
}

fn write_man_recursive(cmd: &Command, output: &Path) -> anyhow::Result<()> {
    let man = clap_mangen::Man::new(cmd.clone());
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    fs::write(output.join(format!("{}.1", cmd.get_name())), buf)?;

    for sub in cmd.get_subcommands() {
        write_man_recursive(sub, output)?;
    }
    Ok(())
}

pub fn write_markdown(cmd: &Command, output: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(output)?;
    write_markdown_recursive(cmd, output, &[])
}

fn write_markdown_recursive(cmd: &Command, output: &Path, path: &[String]) -> anyhow::Result<()> {
    let mut full_path = path.to_vec();
    full_path.push(cmd.get_name().to_string());

    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", full_path.join(" ")));
    if let Some(about) = cmd.get_about() {
        out.push_str(&format!("{about}\n\n"));
    }

    let flags: Vec<_> = cmd.get_arguments().filter(|a| !a.is_positional()).collect();
    if !flags.is_empty() {
        out.push_str("## Flags\n\n");
        for arg in flags {
            let long = arg.get_long().map(|l| format!("--{l}")).unwrap_or_default();
            let short = arg.get_short().map(|s| format!("-{s}, ")).unwrap_or_default();
            let help = arg.get_help().map(|h| h.to_string()).unwrap_or_default();
            out.push_str(&format!("- `{short}{long}` — {help}\n"));
        }
        out.push('\n');
    }

    let mut file = fs::File::create(output.join(format!("{}.md", full_path.join("_"))))?;
    file.write_all(out.as_bytes())?;

    for sub in cmd.get_subcommands() {
        write_markdown_recursive(sub, output, &full_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_markdown_file_per_node() {
        let cmd = Command::new("governor")
            .about("a governor-based service")
            .subcommand(Command::new("serve").about("run the server"));
        let dir = tempfile::tempdir().unwrap();
        write_markdown(&cmd, dir.path()).unwrap();
        assert!(dir.path().join("governor.md").exists());
        assert!(dir.path().join("governor_serve.md").exists());
    }
}
