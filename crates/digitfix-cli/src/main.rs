use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use digitfix_classfile::ClassReader;
use digitfix_harness::{HarnessConfig, SelfTest};
use digitfix_patch::{
    AgentArgs, DigitListTransformer, EmbeddedTemplate, PatchConfig, PatchState, SpecimenKind,
    TransformOutcome, digest, specimen,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_NOT_OK: u8 = 1;
const EXIT_ERROR: u8 = 2;

/// Contents of a `--config` file: a `[patch]` and a `[harness]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct DigitfixConfig {
    patch: PatchConfig,
    harness: HarnessConfig,
}

impl DigitfixConfig {
    fn from_toml_str(text: &str) -> Result<Self, String> {
        let config: Self =
            toml::from_str(text).map_err(|error| format!("config_parse_failed: {error}"))?;
        config.patch.validate().map_err(|error| error.to_string())?;
        Ok(config)
    }

    fn load(path: Option<&Path>) -> Result<Self, String> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|error| {
            format!("config_read_failed path={} error={error}", path.display())
        })?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    File(PathBuf),
    Specimen(SpecimenKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Artifact {
    Class(SpecimenKind),
    Template,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    SelfTest {
        target: Target,
        agent: bool,
        agent_args: Option<String>,
        template: Option<PathBuf>,
        config: Option<PathBuf>,
        print_actuals: bool,
        json: bool,
    },
    Patch {
        input: PathBuf,
        output: PathBuf,
        template: Option<PathBuf>,
        config: Option<PathBuf>,
        json: bool,
    },
    Specimen {
        artifact: Artifact,
        output: PathBuf,
    },
}

#[derive(Debug)]
struct CliConfig {
    command: Command,
    log: String,
}

fn print_help() {
    let help = "\
digitfix: DigitList HALF_UP rounding patch and self test

USAGE:
    digitfix <COMMAND> [OPTIONS]

COMMANDS:
    selftest              Run the rounding battery against a DigitList class
    patch                 Rewrite a DigitList class file offline
    specimen              Write a built-in class file

SELFTEST OPTIONS:
    --target <PATH>       Class file to test
    --specimen <KIND>     Built-in class to test: affected (default) or fixed
    --agent               Install the patch before the class is defined
    --agent-args <ARGS>   Agent arguments such as template=PATH,config=PATH
                          (implies --agent)
    --template <PATH>     Compiled template class (implies --agent)
    --config <PATH>       TOML file with [patch] and [harness] tables
    --print-actuals       Report the exact binary value of every input
    --json                Emit the report as JSON

PATCH OPTIONS:
    --input <PATH>        Class file to rewrite
    --output <PATH>       Destination, written only when the class changes
    --template <PATH>     Compiled template class
    --config <PATH>       TOML file with a [patch] table
    --json                Emit the transform report as JSON

SPECIMEN OPTIONS:
    --kind <KIND>         affected, fixed or template
    --output <PATH>       Destination class file

GLOBAL OPTIONS:
    --log <FILTER>        tracing filter when RUST_LOG is unset (default: warn)
    -h, --help            Show this help
";
    println!("{help}");
}

const SELFTEST_FLAGS: &[&str] = &[
    "--target",
    "--specimen",
    "--agent",
    "--agent-args",
    "--template",
    "--config",
    "--print-actuals",
    "--json",
];
const PATCH_FLAGS: &[&str] = &["--input", "--output", "--template", "--config", "--json"];
const SPECIMEN_FLAGS: &[&str] = &["--kind", "--output"];

#[derive(Debug, Default)]
struct Options {
    target: Option<PathBuf>,
    specimen: Option<SpecimenKind>,
    agent: bool,
    agent_args: Option<String>,
    template: Option<PathBuf>,
    config: Option<PathBuf>,
    print_actuals: bool,
    json: bool,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    kind: Option<Artifact>,
}

fn value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_artifact(text: &str) -> Result<Artifact, String> {
    if text == "template" {
        return Ok(Artifact::Template);
    }
    text.parse::<SpecimenKind>()
        .map(Artifact::Class)
        .map_err(|error| error.to_string())
}

fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let Some(command) = args.first() else {
        print_help();
        return Err(String::new());
    };
    let allowed = match command.as_str() {
        "selftest" => SELFTEST_FLAGS,
        "patch" => PATCH_FLAGS,
        "specimen" => SPECIMEN_FLAGS,
        "-h" | "--help" | "help" => {
            print_help();
            return Err(String::new());
        }
        unknown => return Err(format!("unknown command: {unknown}")),
    };

    let mut options = Options::default();
    let mut log = "warn".to_owned();
    let mut index = 1;
    while index < args.len() {
        let flag = args[index].as_str();
        match flag {
            "-h" | "--help" => {
                print_help();
                return Err(String::new());
            }
            "--log" => log = value(args, &mut index, flag)?.to_owned(),
            _ if !allowed.contains(&flag) => {
                return Err(format!("unknown option for {command}: {flag}"));
            }
            "--target" => options.target = Some(PathBuf::from(value(args, &mut index, flag)?)),
            "--specimen" => {
                let kind = value(args, &mut index, flag)?;
                options.specimen =
                    Some(kind.parse::<SpecimenKind>().map_err(|error| error.to_string())?);
            }
            "--agent" => options.agent = true,
            "--agent-args" => options.agent_args = Some(value(args, &mut index, flag)?.to_owned()),
            "--template" => options.template = Some(PathBuf::from(value(args, &mut index, flag)?)),
            "--config" => options.config = Some(PathBuf::from(value(args, &mut index, flag)?)),
            "--print-actuals" => options.print_actuals = true,
            "--json" => options.json = true,
            "--input" => options.input = Some(PathBuf::from(value(args, &mut index, flag)?)),
            "--output" => options.output = Some(PathBuf::from(value(args, &mut index, flag)?)),
            "--kind" => options.kind = Some(parse_artifact(value(args, &mut index, flag)?)?),
            other => return Err(format!("unknown option: {other}")),
        }
        index += 1;
    }

    let command = match command.as_str() {
        "selftest" => {
            let target = match (options.target, options.specimen) {
                (Some(_), Some(_)) => {
                    return Err("--target and --specimen are mutually exclusive".to_owned());
                }
                (Some(path), None) => Target::File(path),
                (None, kind) => Target::Specimen(kind.unwrap_or(SpecimenKind::Affected)),
            };
            Command::SelfTest {
                target,
                agent: options.agent || options.agent_args.is_some() || options.template.is_some(),
                agent_args: options.agent_args,
                template: options.template,
                config: options.config,
                print_actuals: options.print_actuals,
                json: options.json,
            }
        }
        "patch" => Command::Patch {
            input: options.input.ok_or("patch requires --input")?,
            output: options.output.ok_or("patch requires --output")?,
            template: options.template,
            config: options.config,
            json: options.json,
        },
        _ => Command::Specimen {
            artifact: options.kind.ok_or("specimen requires --kind")?,
            output: options.output.ok_or("specimen requires --output")?,
        },
    };
    Ok(CliConfig { command, log })
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed when run from tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn read(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path)
        .map_err(|error| format!("read_failed path={} error={error}", path.display()))
}

fn write(path: &Path, bytes: &[u8]) -> Result<(), String> {
    std::fs::write(path, bytes)
        .map_err(|error| format!("write_failed path={} error={error}", path.display()))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|error| format!("json_serialize_failed: {error}"))
}

fn run_selftest(
    target: &Target,
    agent: bool,
    agent_args: Option<&str>,
    template: Option<&Path>,
    config: Option<&Path>,
    print_actuals: bool,
    json: bool,
) -> Result<u8, String> {
    let file = DigitfixConfig::load(config)?;
    let mut harness = file.harness;
    harness.print_actuals |= print_actuals;
    let bytes = match target {
        Target::File(path) => read(path)?,
        Target::Specimen(kind) => specimen(*kind).map_err(|error| error.to_string())?,
    };

    let mut test = SelfTest::new(harness);
    if agent {
        let mut patch = AgentArgs::parse(agent_args)
            .and_then(|args| args.apply(file.patch))
            .map_err(|error| error.to_string())?;
        if let Some(template) = template {
            patch.template_path = Some(template.to_path_buf());
        }
        test = test.with_agent(patch);
    }
    let report = test.run(bytes).map_err(|error| error.to_string())?;
    if json {
        println!("{}", to_json(&report)?);
    } else {
        print!("{report}");
    }
    Ok(if report.diagnosis.is_success() {
        EXIT_OK
    } else {
        EXIT_NOT_OK
    })
}

fn run_patch(
    input: &Path,
    output: &Path,
    template: Option<&Path>,
    config: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let mut patch = DigitfixConfig::load(config)?.patch;
    if let Some(template) = template {
        patch.template_path = Some(template.to_path_buf());
    }
    let bytes = read(input)?;
    // An unreadable class is offered under the target name so the
    // transformer records the rejection.
    let class_name = ClassReader::new(&bytes)
        .map_or_else(|_| patch.target_class.clone(), |reader| reader.name().to_owned());
    let transformer = DigitListTransformer::new(patch, Arc::new(PatchState::new()))
        .map_err(|error| error.to_string())?;
    let report = transformer.transform_with_report(&class_name, &bytes);
    if let Some(rewritten) = &report.bytes {
        write(output, rewritten)?;
        info!(path = %output.display(), bytes = rewritten.len(), "patched class written");
    }

    if json {
        println!("{}", to_json(&report)?);
    } else {
        match &report.outcome {
            TransformOutcome::Rejected { detail } => {
                println!("{class_name}: rejected ({detail})");
            }
            outcome => println!("{class_name}: {}", outcome.as_str()),
        }
    }
    Ok(match report.outcome {
        TransformOutcome::Modified
        | TransformOutcome::AlreadyFixed
        | TransformOutcome::AlreadyPatched => EXIT_OK,
        _ => EXIT_NOT_OK,
    })
}

fn run_specimen(artifact: Artifact, output: &Path) -> Result<u8, String> {
    let bytes = match artifact {
        Artifact::Class(kind) => specimen(kind),
        Artifact::Template => EmbeddedTemplate::from_config(&PatchConfig::default()).assemble(),
    }
    .map_err(|error| error.to_string())?;
    write(output, &bytes)?;
    println!(
        "wrote {} ({} bytes, xxh3 {})",
        output.display(),
        bytes.len(),
        digest(&bytes)
    );
    Ok(EXIT_OK)
}

fn run(args: &[String]) -> Result<u8, String> {
    let cli = parse_args(args)?;
    init_tracing(&cli.log);
    match &cli.command {
        Command::SelfTest {
            target,
            agent,
            agent_args,
            template,
            config,
            print_actuals,
            json,
        } => run_selftest(
            target,
            *agent,
            agent_args.as_deref(),
            template.as_deref(),
            config.as_deref(),
            *print_actuals,
            *json,
        ),
        Command::Patch {
            input,
            output,
            template,
            config,
            json,
        } => run_patch(input, output, template.as_deref(), config.as_deref(), *json),
        Command::Specimen { artifact, output } => run_specimen(*artifact, output),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(error) if error.is_empty() => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR digitfix failed: {error}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}
