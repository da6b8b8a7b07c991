//! A small CLI tool for checking ballot audit hashes.
//! This uses the same hashing code as the backend, so a hash printed on a
//! receipt can be recomputed independently of the server.

use chrono::{DateTime, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};

use palmvote_backend::crypto::{audit, SessionKey};
use palmvote_backend::model::mongodb::Id;

const PROGRAM_NAME: &str = "audit-cli";

const ABOUT_TEXT: &str = "Issue session keys and compute or verify ballot audit hashes.

EXIT CODES:
     0: Success (for `verify`, the hash matched).
   255: Ran successfully, but the hash did not match.
 Other: Error.";

const SESSION_KEY: &str = "session-key";
const HASH: &str = "hash";
const VERIFY: &str = "verify";

const BALLOT_ID: &str = "ballot-id";
const VOTER_CODE: &str = "voter-code";
const CANDIDATE_ID: &str = "candidate-id";
const CAST_AT: &str = "cast-at";
const KEY: &str = "key";
const EXPECTED: &str = "expected";

const CAST_AT_HELP: &str = "The cast timestamp in RFC 3339 form,\n\
as printed on the receipt (e.g. 2026-03-01T09:30:00.000000Z)";

const KEY_HELP: &str = "The voter's base64 session key.\n\
Omit for ballots cast by voters without a key";

/// The arguments identifying a ballot, shared by `hash` and `verify`.
fn ballot_args() -> [Arg; 5] {
    [
        Arg::new(BALLOT_ID)
            .long(BALLOT_ID)
            .help("The ballot ID")
            .action(ArgAction::Set)
            .required(true),
        Arg::new(VOTER_CODE)
            .long(VOTER_CODE)
            .help("The voter's code")
            .action(ArgAction::Set)
            .required(true),
        Arg::new(CANDIDATE_ID)
            .long(CANDIDATE_ID)
            .help("The candidate ID")
            .action(ArgAction::Set)
            .required(true),
        Arg::new(CAST_AT)
            .long(CAST_AT)
            .help(CAST_AT_HELP)
            .action(ArgAction::Set)
            .required(true),
        Arg::new(KEY).long(KEY).help(KEY_HELP).action(ArgAction::Set),
    ]
}

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .subcommand(Command::new(SESSION_KEY).about("Print a freshly issued base64 session key"))
        .subcommand(
            Command::new(HASH)
                .about("Compute the audit hash of a ballot")
                .args(ballot_args()),
        )
        .subcommand(
            Command::new(VERIFY)
                .about("Check an audit hash against the ballot it claims to describe")
                .args(ballot_args())
                .arg(
                    Arg::new(EXPECTED)
                        .long(EXPECTED)
                        .help("The audit hash to check")
                        .action(ArgAction::Set)
                        .required(true),
                ),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// An argument could not be parsed; the message says which.
    Input(String),
}

/// A ballot's hashed fields, parsed from the command line.
struct BallotFields {
    ballot_id: Id,
    voter_code: String,
    candidate_id: Id,
    cast_at: DateTime<Utc>,
    key: Option<SessionKey>,
}

impl BallotFields {
    fn from_args(args: &ArgMatches) -> Result<Self, Error> {
        // Required arguments are guaranteed to be present.
        let arg = |name: &str| args.get_one::<String>(name).unwrap().as_str();
        let parse_id = |name: &str| {
            arg(name)
                .parse::<Id>()
                .map_err(|e| Error::Input(format!("invalid {name}: {e}")))
        };

        let cast_at = DateTime::parse_from_rfc3339(arg(CAST_AT))
            .map_err(|e| Error::Input(format!("invalid {CAST_AT}: {e}")))?
            .with_timezone(&Utc);
        let key = args
            .get_one::<String>(KEY)
            .map(|k| k.parse::<SessionKey>())
            .transpose()
            .map_err(|e| Error::Input(format!("invalid {KEY}: {e}")))?;

        Ok(Self {
            ballot_id: parse_id(BALLOT_ID)?,
            voter_code: arg(VOTER_CODE).to_string(),
            candidate_id: parse_id(CANDIDATE_ID)?,
            cast_at,
            key,
        })
    }

    fn hash(&self) -> String {
        audit::compute_hash(
            &self.ballot_id,
            &self.voter_code,
            &self.candidate_id,
            &self.cast_at,
            self.key.as_ref(),
        )
    }

    fn verify(&self, expected: &str) -> bool {
        audit::verify_hash(
            &self.ballot_id,
            &self.voter_code,
            &self.candidate_id,
            &self.cast_at,
            self.key.as_ref(),
            expected,
        )
    }
}

/// Run the chosen subcommand, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let result = match args.subcommand() {
        Some((SESSION_KEY, _)) => {
            println!("{}", SessionKey::random().to_base64());
            Ok(0)
        }
        Some((HASH, sub_args)) => BallotFields::from_args(sub_args).map(|fields| {
            println!("{}", fields.hash());
            0
        }),
        Some((VERIFY, sub_args)) => BallotFields::from_args(sub_args).map(|fields| {
            // Required argument is guaranteed to be present.
            let expected: &String = sub_args.get_one(EXPECTED).unwrap();
            if fields.verify(expected) {
                println!("Audit hash matches.");
                0
            } else {
                println!("Audit hash does not match this ballot.");
                255
            }
        }),
        // A subcommand is required, so clap rejects anything else.
        _ => unreachable!(),
    };
    match result {
        Ok(code) => code,
        Err(Error::Input(msg)) => {
            println!("Invalid input: {}", msg);
            1
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BALLOT: &str = "65e1a0c2f1d4c3b2a1908070";
    const CANDIDATE: &str = "65e1a0c2f1d4c3b2a1908071";
    const CAST_AT_VALUE: &str = "2026-03-01T09:30:00.000000Z";

    fn ballot_argv(command: &str, key: Option<&str>) -> Vec<String> {
        let mut argv = vec![
            PROGRAM_NAME,
            command,
            "--ballot-id",
            BALLOT,
            "--voter-code",
            "V100",
            "--candidate-id",
            CANDIDATE,
            "--cast-at",
            CAST_AT_VALUE,
        ]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
        if let Some(key) = key {
            argv.push("--key".to_string());
            argv.push(key.to_string());
        }
        argv
    }

    fn fields(key: Option<&str>) -> BallotFields {
        let args = cli().get_matches_from(ballot_argv(HASH, key));
        let (_, sub_args) = args.subcommand().unwrap();
        BallotFields::from_args(sub_args).unwrap()
    }

    #[test]
    fn hash_matches_backend() {
        let key = SessionKey::random();
        let fields = fields(Some(&key.to_base64()));
        let expected = audit::compute_hash(
            &BALLOT.parse().unwrap(),
            "V100",
            &CANDIDATE.parse().unwrap(),
            &DateTime::parse_from_rfc3339(CAST_AT_VALUE)
                .unwrap()
                .with_timezone(&Utc),
            Some(&key),
        );
        assert_eq!(fields.hash(), expected);
        assert!(fields.verify(&expected));
    }

    #[test]
    fn verify_exit_codes() {
        let key = SessionKey::random().to_base64();
        let hash = fields(Some(&key)).hash();

        let mut argv = ballot_argv(VERIFY, Some(&key));
        argv.extend(["--expected".to_string(), hash]);
        assert_eq!(run(&cli().get_matches_from(argv)), 0);

        let mut argv = ballot_argv(VERIFY, None);
        argv.extend(["--expected".to_string(), fields(Some(&key)).hash()]);
        assert_eq!(run(&cli().get_matches_from(argv)), 255);
    }

    #[test]
    fn bad_input_is_an_error() {
        let argv = ballot_argv(HASH, Some("short"));
        assert_eq!(run(&cli().get_matches_from(argv)), 1);

        let mut argv = ballot_argv(HASH, None);
        argv[3] = "not-an-id".to_string();
        assert_eq!(run(&cli().get_matches_from(argv)), 1);

        assert_eq!(
            run(&cli().get_matches_from([PROGRAM_NAME, SESSION_KEY])),
            0
        );
    }

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }
}
