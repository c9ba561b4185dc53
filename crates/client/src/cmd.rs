//! The runtime-built CLI subcommand tree (`spec.md` §4.6 "cmd registrar").
//! Each registered client contributes commands the same way a service
//! contributes config defaults elsewhere in the workspace: through a
//! narrow registrar handed to it at registration time, nested the same
//! way [`governor_router::RouterBuilder::group`] nests a sub-router.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use clap::{Arg, ArgAction, Command};

/// A flag bound by pointer (`spec.md` §4.6): the runtime writes the
/// parsed value into the cell once `clap` has matched it, and the
/// handler reads it back out of the same cell after dispatch.
#[derive(Clone)]
pub enum CmdFlagValue {
    Bool(Arc<Mutex<bool>>),
    Int(Arc<Mutex<i64>>),
    String(Arc<Mutex<String>>),
    StringList(Arc<Mutex<Vec<String>>>),
}

pub struct CmdFlag {
    pub long: String,
    pub short: Option<char>,
    pub usage: String,
    pub required: bool,
    pub value: CmdFlagValue,
}

impl CmdFlag {
    pub fn new(long: impl Into<String>, usage: impl Into<String>, value: CmdFlagValue) -> Self {
        Self {
            long: long.into(),
            short: None,
            usage: usage.into(),
            required: false,
            value,
        }
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.long.clone())
            .long(self.long.clone())
            .help(self.usage.clone())
            .required(self.required);
        if let Some(short) = self.short {
            arg = arg.short(short);
        }
        arg = match &self.value {
            CmdFlagValue::Bool(_) => arg.action(ArgAction::SetTrue),
            CmdFlagValue::Int(_) | CmdFlagValue::String(_) => arg.action(ArgAction::Set),
            CmdFlagValue::StringList(_) => arg.action(ArgAction::Append),
        };
        arg
    }

    fn apply(&self, matches: &clap::ArgMatches) {
        match &self.value {
            CmdFlagValue::Bool(cell) => {
                *cell.lock().expect("flag cell poisoned") = matches.get_flag(&self.long);
            }
            CmdFlagValue::Int(cell) => {
                if let Some(raw) = matches.get_one::<String>(&self.long) {
                    if let Ok(parsed) = raw.parse::<i64>() {
                        *cell.lock().expect("flag cell poisoned") = parsed;
                    }
                }
            }
            CmdFlagValue::String(cell) => {
                if let Some(raw) = matches.get_one::<String>(&self.long) {
                    *cell.lock().expect("flag cell poisoned") = raw.clone();
                }
            }
            CmdFlagValue::StringList(cell) => {
                if let Some(values) = matches.get_many::<String>(&self.long) {
                    *cell.lock().expect("flag cell poisoned") = values.cloned().collect();
                }
            }
        }
    }
}

/// Declares one subcommand or group: its name, one-line usage, and flags.
pub struct CmdDesc {
    pub name: String,
    pub usage: String,
    pub flags: Vec<CmdFlag>,
}

impl CmdDesc {
    pub fn new(name: impl Into<String>, usage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usage: usage.into(),
            flags: Vec::new(),
        }
    }

    pub fn flag(mut self, flag: CmdFlag) -> Self {
        self.flags.push(flag);
        self
    }
}

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A leaf command's handler. Flags have already been written into their
/// cells by the time this runs.
pub type CmdHandler = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

struct Leaf {
    flags: Vec<CmdFlag>,
    run: CmdHandler,
}

/// Builds one level of the command tree. Handed to each client's
/// `register`.
pub struct CmdRegistrar {
    path: Vec<String>,
    subcommands: Vec<Command>,
    leaves: Rc<RefCell<HashMap<Vec<String>, Leaf>>>,
}

impl CmdRegistrar {
    pub fn register(&mut self, desc: CmdDesc, handler: CmdHandler) {
        let mut cmd = Command::new(desc.name.clone()).about(desc.usage.clone());
        for flag in &desc.flags {
            cmd = cmd.arg(flag.to_arg());
        }

        let mut path = self.path.clone();
        path.push(desc.name.clone());
        self.leaves.borrow_mut().insert(
            path,
            Leaf {
                flags: desc.flags,
                run: handler,
            },
        );
        self.subcommands.push(cmd);
    }

    pub fn group(&mut self, desc: CmdDesc, build: impl FnOnce(&mut CmdRegistrar)) {
        let mut path = self.path.clone();
        path.push(desc.name.clone());
        let mut child = CmdRegistrar {
            path,
            subcommands: Vec::new(),
            leaves: self.leaves.clone(),
        };
        build(&mut child);

        let mut cmd = Command::new(desc.name.clone()).about(desc.usage.clone()).subcommand_required(true);
        for sub in child.subcommands {
            cmd = cmd.subcommand(sub);
        }
        self.subcommands.push(cmd);
    }
}

/// The whole tree assembled from every registered client, ready to be
/// merged under the top-level CLI command and dispatched once `clap` has
/// matched arguments.
pub struct CmdTree {
    leaves: Rc<RefCell<HashMap<Vec<String>, Leaf>>>,
    subcommands: Vec<Command>,
}

impl CmdTree {
    pub fn new() -> Self {
        Self {
            leaves: Rc::new(RefCell::new(HashMap::new())),
            subcommands: Vec::new(),
        }
    }

    /// Registers one client's top-level commands under `name` as a group.
    pub fn register(&mut self, name: impl Into<String>, usage: impl Into<String>, build: impl FnOnce(&mut CmdRegistrar)) {
        let name = name.into();
        let mut registrar = CmdRegistrar {
            path: vec![name.clone()],
            subcommands: Vec::new(),
            leaves: self.leaves.clone(),
        };
        build(&mut registrar);

        let mut cmd = Command::new(name).about(usage.into()).subcommand_required(true);
        for sub in registrar.subcommands {
            cmd = cmd.subcommand(sub);
        }
        self.subcommands.push(cmd);
    }

    /// Attaches every registered client's command group onto `parent`.
    pub fn attach(&self, mut parent: Command) -> Command {
        for cmd in self.subcommands.clone() {
            parent = parent.subcommand(cmd);
        }
        parent
    }

    /// Walks `matches` along its chain of matched subcommands, applying
    /// any flags registered at each level, and runs the handler at the
    /// deepest matched node. Returns `Ok(false)` if no path in `matches`
    /// resolves to a registered leaf.
    pub async fn dispatch(&self, matches: &clap::ArgMatches) -> anyhow::Result<bool> {
        let mut path = Vec::new();
        let mut current = matches;
        loop {
            let Some((name, sub_matches)) = current.subcommand() else {
                break;
            };
            path.push(name.to_string());
            if let Some(leaf) = self.leaves.borrow().get(&path) {
                for flag in &leaf.flags {
                    flag.apply(sub_matches);
                }
            }
            current = sub_matches;
        }

        let run = {
            let leaves = self.leaves.borrow();
            match leaves.get(&path) {
                Some(leaf) => leaf.run.clone(),
                None => return Ok(false),
            }
        };
        run().await?;
        Ok(true)
    }
}

impl Default for CmdTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatches_nested_command_with_flags() {
        let mut tree = CmdTree::new();
        let seen = Arc::new(Mutex::new(String::new()));
        let name_cell = Arc::new(Mutex::new(String::new()));

        {
            let seen = seen.clone();
            let name_cell = name_cell.clone();
            tree.register("widgets", "manage widgets", move |registrar| {
                registrar.group(CmdDesc::new("create", "create a widget"), move |group| {
                    let seen = seen.clone();
                    let name_cell = name_cell.clone();
                    group.register(
                        CmdDesc::new("run", "run it").flag(CmdFlag::new(
                            "name",
                            "widget name",
                            CmdFlagValue::String(name_cell.clone()),
                        )),
                        Arc::new(move || {
                            let seen = seen.clone();
                            let name_cell = name_cell.clone();
                            Box::pin(async move {
                                *seen.lock().unwrap() = "ran".to_string();
                                let _ = name_cell;
                                Ok(())
                            })
                        }),
                    );
                });
            });
        }

        let top = Command::new("governor");
        let top = tree.attach(top);
        let matches = top.try_get_matches_from(["governor", "widgets", "create", "run", "--name", "gizmo"]).unwrap();

        let dispatched = tree.dispatch(&matches).await.unwrap();
        assert!(dispatched);
        assert_eq!(*seen.lock().unwrap(), "ran");
        assert_eq!(*name_cell.lock().unwrap(), "gizmo");
    }

    #[tokio::test]
    async fn unmatched_path_does_not_dispatch() {
        let tree = CmdTree::new();
        let top = Command::new("governor").subcommand(Command::new("noop"));
        let matches = top.try_get_matches_from(["governor", "noop"]).unwrap();
        assert!(!tree.dispatch(&matches).await.unwrap());
    }
}
