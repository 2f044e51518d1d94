use clap::{Arg, ArgMatches, Command as ClapCommand};
use console::Term;
use orangebeard_core::{
    entity::{FinishTestRun, StartTestRun},
    Config, OrangebeardClient, ResolvedId,
};
use tracing::*;

/// Build the CLI with clap's builder pattern
fn build_cli() -> ClapCommand {
    ClapCommand::new("orangebeard")
        .about("Start or finish an Orangebeard test run from the shell")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(Arg::new("endpoint")
            .short('e')
            .long("endpoint")
            .global(true)
            .help("Orangebeard base URL. Defaults to the loaded configuration"))
        .arg(Arg::new("token")
            .short('t')
            .long("token")
            .global(true)
            .help("Listener access token. Defaults to the loaded configuration"))
        .arg(Arg::new("project")
            .short('p')
            .long("project")
            .global(true)
            .help("Project to report to. Defaults to the loaded configuration"))
        .subcommand(
            ClapCommand::new("start")
                .about("Start a test run and print its id")
                .arg(Arg::new("testset")
                    .short('s')
                    .long("testset")
                    .help("Name of the test set"))
                .arg(Arg::new("description")
                    .short('d')
                    .long("description")
                    .help("Description of the test run"))
        )
        .subcommand(
            ClapCommand::new("finish")
                .about("Finish a test run started earlier")
                .arg(Arg::new("id")
                    .long("id")
                    .required(true)
                    .help("Id of the test run to finish"))
        )
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Start {
        testset: Option<String>,
        description: Option<String>,
    },
    Finish {
        id: String,
    },
}

/// Apply the global connection flags to `cfg` and extract the subcommand.
fn interpret(matches: &ArgMatches, cfg: &mut Config) -> eyre::Result<Invocation> {
    let flag = |name: &str| matches.get_one::<String>(name).cloned();
    if let Some(endpoint) = flag("endpoint") {
        cfg.endpoint = Some(endpoint);
    }
    if let Some(token) = flag("token") {
        cfg.token = Some(token);
    }
    if let Some(project) = flag("project") {
        cfg.project = Some(project);
    }

    match matches.subcommand() {
        Some(("start", start_matches)) => Ok(Invocation::Start {
            testset: start_matches.get_one::<String>("testset").cloned(),
            description: start_matches.get_one::<String>("description").cloned(),
        }),
        Some(("finish", finish_matches)) => Ok(Invocation::Finish {
            id: finish_matches
                .get_one::<String>("id")
                .cloned()
                .ok_or_else(|| eyre::eyre!("--id is required"))?,
        }),
        _ => unreachable!("Subcommand required is set to true"),
    }
}

/// orangebeard CLI.
pub struct App {
    cfg: Config,
    term: Term,
}

impl App {
    pub fn new(cfg: Config) -> App {
        App {
            cfg,
            term: Term::stdout(),
        }
    }

    /// Parse command-line args and run the orangebeard CLI sub command.
    pub async fn run(self) -> eyre::Result<()> {
        let matches = build_cli().get_matches();
        self.execute(&matches).await
    }

    /// Like [`App::run`], with explicit arguments.
    pub async fn run_from<I, T>(self, args: I) -> eyre::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = build_cli().try_get_matches_from(args)?;
        self.execute(&matches).await
    }

    async fn execute(mut self, matches: &ArgMatches) -> eyre::Result<()> {
        let invocation = interpret(matches, &mut self.cfg)?;
        debug!("{invocation:?} with {:?}", self.cfg);

        match invocation {
            Invocation::Start {
                testset,
                description,
            } => {
                let testset = testset
                    .or_else(|| self.cfg.testset.clone())
                    .ok_or_else(|| eyre::eyre!("a test set name is required: pass --testset or set testset in orangebeard.toml"))?;
                let mut start =
                    StartTestRun::new(testset).attributes(self.cfg.attributes.clone());
                if let Some(description) = description.or_else(|| self.cfg.description.clone()) {
                    start = start.description(description);
                }

                let client = OrangebeardClient::new(self.cfg)?;
                let run = client.start_test_run(start);
                let id = client
                    .wait_for(run)
                    .await?
                    .ok_or_else(|| eyre::eyre!("Orangebeard did not return a test run id"))?;
                self.term.write_line(id.as_str())?;
                Ok(())
            }
            Invocation::Finish { id } => {
                let client = OrangebeardClient::new(self.cfg)?;
                let run = client.resume_test_run(ResolvedId::new(id.clone()));
                client.finish_test_run(run, FinishTestRun::now()).await?;
                self.term.write_line(&format!("Test run {id} finished"))?;
                Ok(())
            }
        }
    }
}
