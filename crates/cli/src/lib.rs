//! Top-level CLI surface (`spec.md` §6): wires the global flags, the
//! service registry (C5), and the client registry (C6) into one runnable
//! process. `serve` starts the HTTP server, `setup` invokes `/setupz`
//! through the client framework, `doc` renders the command tree to disk,
//! and any other subcommand dispatches through the registered clients'
//! own command trees.
//!
//! Grounded in `local_backend/src/main.rs`'s startup sequencing, adapted
//! from one fixed binary into a reusable entry point an embedding
//! application assembles by registering its own services and clients —
//! `governor` itself ships no concrete service, only the framework.

mod doc;
mod tracing_init;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use governor_client::{Client, ClientKit, CmdTree, HTTPClient, HTTPFetcher, Terminal, BASE_URL_KEY};
use governor_config::{ConfigResolver, Opts, SecretBackend};
use governor_core::{Service, ServiceConfigRegistrar, ServiceLogger};

const SETUP_SECRET_TTL: Duration = Duration::from_secs(60);

/// Accumulates registered services and clients, then runs the process
/// end to end once [`Runtime::run`] is called.
pub struct Runtime {
    appname: String,
    env_prefix: String,
    server_secret_backend: Arc<dyn SecretBackend>,
    client_secret_backend: Arc<dyn SecretBackend>,
    services: Vec<(String, String, Arc<dyn Service>)>,
    clients: Vec<(String, String, Arc<dyn Client>)>,
}

impl Runtime {
    pub fn new(
        appname: impl Into<String>,
        env_prefix: impl Into<String>,
        server_secret_backend: Arc<dyn SecretBackend>,
        client_secret_backend: Arc<dyn SecretBackend>,
    ) -> Self {
        Self {
            appname: appname.into(),
            env_prefix: env_prefix.into(),
            server_secret_backend,
            client_secret_backend,
            services: Vec::new(),
            clients: Vec::new(),
        }
    }

    pub fn register_service(&mut self, name: impl Into<String>, url_prefix: impl Into<String>, service: Arc<dyn Service>) {
        self.services.push((name.into(), url_prefix.into(), service));
    }

    pub fn register_client(&mut self, name: impl Into<String>, usage: impl Into<String>, client: Arc<dyn Client>) {
        self.clients.push((name.into(), usage.into(), client));
    }

    fn base_command(&self) -> Command {
        Command::new(self.appname.clone())
            .about("a governor-based service")
            .arg(
                Arg::new("config")
                    .long("config")
                    .help("path to the server config file")
                    .global(true)
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("client-config")
                    .long("client-config")
                    .help("path to the client config file")
                    .global(true)
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("log-level")
                    .long("log-level")
                    .help("tracing env-filter directive")
                    .default_value("info")
                    .global(true)
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("log-plain")
                    .long("log-plain")
                    .help("emit plain-text logs instead of JSON")
                    .global(true)
                    .action(ArgAction::SetTrue),
            )
            .subcommand(Command::new("serve").about("run the server"))
            .subcommand(Command::new("setup").about("invoke setup via the client"))
            .subcommand(
                Command::new("doc")
                    .about("generate CLI documentation")
                    .subcommand_required(true)
                    .subcommand(
                        Command::new("man")
                            .about("render man pages")
                            .arg(Arg::new("output").long("output").required(true).action(ArgAction::Set)),
                    )
                    .subcommand(
                        Command::new("md")
                            .about("render markdown pages")
                            .arg(Arg::new("output").long("output").required(true).action(ArgAction::Set)),
                    ),
            )
    }

    /// Parses `std::env::args`, initializes logging, and runs whichever
    /// subcommand was selected. Exit-code mapping (`spec.md` §6: "0 on
    /// success, 1 on any error") is left to the caller's `main`.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut cmd_tree = CmdTree::new();
        let placeholder_opts = Opts {
            appname: self.appname.clone(),
            config_file: None,
            client_config_file: None,
            env_prefix: format!("{}_CLIENT", self.env_prefix),
            log_level: "info".to_string(),
            log_plain: false,
        };
        let mut client_resolver = ConfigResolver::new(placeholder_opts, self.client_secret_backend.clone());

        for (name, usage, client) in &self.clients {
            let mut registrar = ServiceConfigRegistrar::new(name, client_resolver.registrar_mut());
            cmd_tree.register(name.clone(), usage.clone(), |cmds| {
                client.register(&mut registrar, cmds);
            });
        }

        let base = self.base_command();
        let doc_reference = base.clone();
        let top = cmd_tree.attach(base);
        let matches = top.try_get_matches()?;

        let log_level = matches.get_one::<String>("log-level").cloned().unwrap_or_else(|| "info".to_string());
        let log_plain = matches.get_flag("log-plain");
        tracing_init::init(&log_level, log_plain);

        let config_path = matches.get_one::<String>("config").map(PathBuf::from);
        let client_config_path = matches.get_one::<String>("client-config").map(PathBuf::from);

        match matches.subcommand() {
            Some(("serve", _)) => self.run_serve(config_path, log_level, log_plain).await,
            Some(("doc", sub)) => run_doc(&doc_reference, sub),
            Some(("setup", _)) => {
                client_resolver.set_opts(Opts {
                    appname: self.appname.clone(),
                    config_file: client_config_path,
                    client_config_file: None,
                    env_prefix: format!("{}_CLIENT", self.env_prefix),
                    log_level,
                    log_plain,
                });
                self.run_setup(client_resolver).await
            }
            _ => {
                client_resolver.set_opts(Opts {
                    appname: self.appname.clone(),
                    config_file: client_config_path,
                    client_config_file: None,
                    env_prefix: format!("{}_CLIENT", self.env_prefix),
                    log_level,
                    log_plain,
                });
                self.run_client_dispatch(client_resolver, &cmd_tree, &matches).await
            }
        }
    }

    async fn run_serve(&self, config_path: Option<PathBuf>, log_level: String, log_plain: bool) -> anyhow::Result<()> {
        let opts = Opts {
            appname: self.appname.clone(),
            config_file: config_path,
            client_config_file: None,
            env_prefix: self.env_prefix.clone(),
            log_level,
            log_plain,
        };
        let mut builder = governor_core::Builder::new(opts, self.server_secret_backend.clone());
        for (name, prefix, service) in &self.services {
            builder.register(name.clone(), prefix.clone(), service.clone())?;
        }
        builder.build().await?.run().await
    }

    /// Resolves the shared-secret setup key through the client config and
    /// POSTs it to `/setupz`, mirroring what an operator's out-of-band
    /// curl invocation would otherwise do by hand.
    async fn run_setup(&self, client_resolver: ConfigResolver) -> anyhow::Result<()> {
        let resolved = client_resolver.build()?;
        let reader = resolved.root_reader();

        let base_url: String = reader.get_str(BASE_URL_KEY)?;
        let secret: String = reader.get_secret("setupsecret", SETUP_SECRET_TTL).await?;

        let fetcher = HTTPFetcher::new(HTTPClient::new(base_url));
        let req = fetcher.req_json(http::Method::POST, "/setupz", &serde_json::json!({ "secret": secret }))?;
        let res: serde_json::Value = fetcher.do_json(req).await?;

        Terminal::native().stdout(&res.to_string());
        Ok(())
    }

    async fn run_client_dispatch(&self, client_resolver: ConfigResolver, cmd_tree: &CmdTree, matches: &clap::ArgMatches) -> anyhow::Result<()> {
        let resolved = client_resolver.build()?;

        for (name, _, client) in &self.clients {
            let reader = resolved.reader_for(name);
            let base_url: String = reader.get_str(BASE_URL_KEY).unwrap_or_default();
            let fetcher = Arc::new(HTTPFetcher::new(HTTPClient::new(base_url)));
            let kit = ClientKit {
                logger: ServiceLogger::new(name),
                term: Terminal::native(),
                http: fetcher,
            };
            client.init(reader, kit).await?;
        }

        if !cmd_tree.dispatch(matches).await? {
            anyhow::bail!("no matching command");
        }
        Ok(())
    }
}

fn run_doc(reference: &Command, sub: &clap::ArgMatches) -> anyhow::Result<()> {
    match sub.subcommand() {
        Some(("man", man_matches)) => {
            let output = man_matches.get_one::<String>("output").expect("output is a required flag");
            doc::write_man(reference, std::path::Path::new(output))
        }
        Some(("md", md_matches)) => {
            let output = md_matches.get_one::<String>("output").expect("output is a required flag");
            doc::write_markdown(reference, std::path::Path::new(output))
        }
        _ => anyhow::bail!("doc requires a man|md subcommand"),
    }
}
