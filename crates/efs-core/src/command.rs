//! Command encoding for the daemon control socket.
//!
//! A command line is `[<seq> ]<prefix> <subcommand> <arg>...`. Arguments are
//! escaped individually so that whitespace and quotes inside a path or a
//! password survive the daemon's tokenizer:
//!
//! - `\` is written as `\\` and `"` as `\"`
//! - an argument that is empty or contains a space or tab is wrapped in `"`
//! - NUL, `\n` and `\r` cannot be represented and are rejected
//!
//! [`tokenize`] is the exact inverse and is used to split daemon replies and
//! event messages.

use std::fmt::{self, Write as _};

use zeroize::Zeroizing;

use crate::password::Password;
use crate::result::ResultKind;

/// Android user id.
pub type UserId = u32;

/// Errors from encoding a command line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("argument {index} contains a character that cannot be sent ({found:?})")]
    ForbiddenCharacter { index: usize, found: char },

    #[error("command word {0:?} must be a non-empty single token")]
    InvalidCommandWord(String),
}

/// Errors from splitting a line into tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error("line ends with a lone escape character")]
    TrailingEscape,
}

/// One command argument.
#[derive(Clone, PartialEq, Eq)]
pub enum Arg {
    Str(String),
    Int(i64),
    /// Encoded like [`Arg::Str`] but scrubbed from logs.
    Secret(Password),
}

impl Arg {
    pub fn is_secret(&self) -> bool {
        matches!(self, Arg::Secret(_))
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Arg::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Arg::Secret(_) => f.write_str("Secret([REDACTED])"),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value.into())
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Int(value.into())
    }
}

impl From<Password> for Arg {
    fn from(value: Password) -> Self {
        Arg::Secret(value)
    }
}

/// The storage operations understood by `efs-server`.
///
/// Path-identified operations act on an EFS storage container; the
/// user-data family acts on the encrypted data of one Android user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateStorage {
        path: String,
        password: Password,
    },
    UnlockStorage {
        path: String,
        password: Password,
    },
    LockStorage {
        path: String,
    },
    ChangeStoragePassword {
        path: String,
        old_password: Password,
        new_password: Password,
    },
    RemoveStorage {
        path: String,
    },
    StorageStat {
        path: String,
    },
    RecoverAndRemoveStorage {
        path: String,
        password: Password,
    },
    EncryptionProgress {
        path: String,
    },
    EncryptUserData {
        user_id: UserId,
        password: Password,
    },
    UnlockUserData {
        user_id: UserId,
        from_init: bool,
        password: Password,
    },
    LockUserData {
        user_id: UserId,
    },
    ChangeUserDataPassword {
        user_id: UserId,
        old_password: Password,
        new_password: Password,
    },
    RemoveUserEncryptedData {
        user_id: UserId,
    },
    UserDataStat {
        user_id: UserId,
    },
    DecryptUserData {
        user_id: UserId,
        password: Password,
    },
}

impl Operation {
    /// The wire subcommand following the command prefix.
    pub fn subcommand(&self) -> &'static str {
        match self {
            Operation::CreateStorage { .. } => "create",
            Operation::UnlockStorage { .. } => "unlock",
            Operation::LockStorage { .. } => "lock",
            Operation::ChangeStoragePassword { .. } => "change_passwd",
            Operation::RemoveStorage { .. } => "remove",
            Operation::StorageStat { .. } => "stat",
            Operation::RecoverAndRemoveStorage { .. } => "recover",
            Operation::EncryptionProgress { .. } => "get_progress",
            Operation::EncryptUserData { .. } => "encrypt_user_data",
            Operation::UnlockUserData { .. } => "unlock_user_data",
            Operation::LockUserData { .. } => "lock_user_data",
            Operation::ChangeUserDataPassword { .. } => "change_user_data_passwd",
            Operation::RemoveUserEncryptedData { .. } => "remove_user_encrypted_data",
            Operation::UserDataStat { .. } => "user_stat",
            Operation::DecryptUserData { .. } => "decrypt_user_data",
        }
    }

    /// Whether the reply carries a status code or a query payload.
    pub fn result_kind(&self) -> ResultKind {
        match self {
            Operation::StorageStat { .. }
            | Operation::EncryptionProgress { .. }
            | Operation::UserDataStat { .. } => ResultKind::Query,
            _ => ResultKind::Status,
        }
    }

    /// Consume the operation into its subcommand and ordered arguments.
    pub fn into_args(self) -> (&'static str, Vec<Arg>) {
        let name = self.subcommand();
        let args = match self {
            Operation::CreateStorage { path, password }
            | Operation::UnlockStorage { path, password }
            | Operation::RecoverAndRemoveStorage { path, password } => {
                vec![Arg::Str(path), Arg::Secret(password)]
            }
            Operation::LockStorage { path }
            | Operation::RemoveStorage { path }
            | Operation::StorageStat { path }
            | Operation::EncryptionProgress { path } => vec![Arg::Str(path)],
            Operation::ChangeStoragePassword {
                path,
                old_password,
                new_password,
            } => vec![
                Arg::Str(path),
                Arg::Secret(old_password),
                Arg::Secret(new_password),
            ],
            Operation::EncryptUserData { user_id, password }
            | Operation::DecryptUserData { user_id, password } => {
                vec![Arg::from(user_id), Arg::Secret(password)]
            }
            Operation::UnlockUserData {
                user_id,
                from_init,
                password,
            } => vec![
                Arg::from(user_id),
                Arg::Int(i64::from(from_init)),
                Arg::Secret(password),
            ],
            Operation::LockUserData { user_id }
            | Operation::RemoveUserEncryptedData { user_id }
            | Operation::UserDataStat { user_id } => vec![Arg::from(user_id)],
            Operation::ChangeUserDataPassword {
                user_id,
                old_password,
                new_password,
            } => vec![
                Arg::from(user_id),
                Arg::Secret(old_password),
                Arg::Secret(new_password),
            ],
        };
        (name, args)
    }
}

/// An encoded command ready to be written to the socket.
///
/// The wire form is zeroized on drop because it may contain passwords.
pub struct EncodedCommand {
    wire: Zeroizing<String>,
    loggable: String,
}

impl EncodedCommand {
    /// The exact line sent to the daemon, without the terminator.
    pub fn wire(&self) -> &str {
        &self.wire
    }

    /// The line with secret arguments replaced by `[REDACTED]`.
    pub fn loggable(&self) -> &str {
        &self.loggable
    }

    /// The wire line followed by `terminator`.
    pub fn to_frame(&self, terminator: u8) -> Zeroizing<Vec<u8>> {
        let mut frame = Zeroizing::new(Vec::with_capacity(self.wire.len() + 1));
        frame.extend_from_slice(self.wire.as_bytes());
        frame.push(terminator);
        frame
    }
}

impl fmt::Debug for EncodedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncodedCommand").field(&self.loggable).finish()
    }
}

/// Encode a command line.
pub fn encode(
    seq: Option<u32>,
    prefix: &str,
    subcommand: &str,
    args: &[Arg],
) -> Result<EncodedCommand, EncodeError> {
    for word in [prefix, subcommand] {
        if word.is_empty() || word.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\')
        {
            return Err(EncodeError::InvalidCommandWord(word.to_string()));
        }
    }

    let mut wire = Zeroizing::new(String::new());
    let mut loggable = String::new();
    if let Some(seq) = seq {
        let _ = write!(wire, "{seq} ");
        let _ = write!(loggable, "{seq} ");
    }
    wire.push_str(prefix);
    wire.push(' ');
    wire.push_str(subcommand);
    loggable.push_str(prefix);
    loggable.push(' ');
    loggable.push_str(subcommand);

    for (index, arg) in args.iter().enumerate() {
        wire.push(' ');
        loggable.push(' ');
        match arg {
            Arg::Str(s) => {
                append_escaped(&mut wire, s, index)?;
                append_escaped(&mut loggable, s, index)?;
            }
            Arg::Int(n) => {
                let _ = write!(wire, "{n}");
                let _ = write!(loggable, "{n}");
            }
            Arg::Secret(pw) => {
                append_escaped(&mut wire, pw.expose(), index)?;
                loggable.push_str("[REDACTED]");
            }
        }
    }

    Ok(EncodedCommand { wire, loggable })
}

/// Append `arg` to `out` using the escaping rule described in the module docs.
pub fn append_escaped(out: &mut String, arg: &str, index: usize) -> Result<(), EncodeError> {
    if let Some(found) = arg.chars().find(|c| matches!(c, '\0' | '\n' | '\r')) {
        return Err(EncodeError::ForbiddenCharacter { index, found });
    }

    let quoted = arg.is_empty() || arg.contains([' ', '\t']);
    if quoted {
        out.push('"');
    }
    for c in arg.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    if quoted {
        out.push('"');
    }
    Ok(())
}

/// Split a line into tokens, honouring double quotes and backslash escapes.
pub fn tokenize(line: &str) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or(TokenizeError::TrailingEscape)?;
                current.push(escaped);
                in_token = true;
            }
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            ' ' | '\t' if !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            _ => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return Err(TokenizeError::UnterminatedQuote);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strs(args: &[&str]) -> Vec<Arg> {
        args.iter().map(|s| Arg::from(*s)).collect()
    }

    #[test]
    fn test_encode_plain_command() {
        let cmd = encode(None, "efs-server", "lock", &strs(&["/data/x"])).unwrap();
        assert_eq!(cmd.wire(), "efs-server lock /data/x");
    }

    #[test]
    fn test_encode_with_sequence_number() {
        let cmd = encode(Some(7), "efs-server", "stat", &strs(&["/data/x"])).unwrap();
        assert_eq!(cmd.wire(), "7 efs-server stat /data/x");
        assert_eq!(cmd.loggable(), "7 efs-server stat /data/x");
    }

    #[test]
    fn test_encode_quotes_whitespace_and_escapes() {
        let cmd = encode(
            None,
            "efs",
            "create",
            &strs(&["/data/my files", "pa\"ss", "back\\slash", ""]),
        )
        .unwrap();
        assert_eq!(
            cmd.wire(),
            r#"efs create "/data/my files" pa\"ss back\\slash """#
        );
    }

    #[test]
    fn test_encode_tab_is_quoted() {
        let cmd = encode(None, "efs", "lock", &strs(&["a\tb"])).unwrap();
        assert_eq!(cmd.wire(), "efs lock \"a\tb\"");
    }

    #[test]
    fn test_encode_int_args() {
        let args = vec![Arg::from(10u32), Arg::Int(-3)];
        let cmd = encode(None, "efs", "lock_user_data", &args).unwrap();
        assert_eq!(cmd.wire(), "efs lock_user_data 10 -3");
    }

    #[test]
    fn test_secret_is_redacted_from_loggable_form() {
        let args = vec![Arg::from("/data/x"), Arg::Secret(Password::new("top secret"))];
        let cmd = encode(Some(1), "efs-server", "unlock", &args).unwrap();
        assert_eq!(cmd.wire(), "1 efs-server unlock /data/x \"top secret\"");
        assert_eq!(cmd.loggable(), "1 efs-server unlock /data/x [REDACTED]");
        assert!(!format!("{cmd:?}").contains("top secret"));
        assert_eq!(format!("{:?}", args[1]), "Secret([REDACTED])");
        assert_eq!(format!("{:?}", Password::new("x")), "Password([REDACTED])");
    }

    #[test]
    fn test_encode_rejects_framing_characters() {
        for bad in ["a\nb", "a\rb", "a\0b"] {
            let err = encode(None, "efs", "create", &strs(&["/p", bad])).unwrap_err();
            assert!(matches!(err, EncodeError::ForbiddenCharacter { index: 1, .. }));
        }
    }

    #[test]
    fn test_encode_rejects_bad_command_words() {
        assert!(matches!(
            encode(None, "efs server", "lock", &[]),
            Err(EncodeError::InvalidCommandWord(_))
        ));
        assert!(matches!(
            encode(None, "efs", "", &[]),
            Err(EncodeError::InvalidCommandWord(_))
        ));
    }

    #[test]
    fn test_frame_appends_terminator() {
        let cmd = encode(None, "efs", "lock", &strs(&["/x"])).unwrap();
        assert_eq!(cmd.to_frame(0).as_slice(), b"efs lock /x\0");
        assert_eq!(cmd.to_frame(b'\n').as_slice(), b"efs lock /x\n");
    }

    #[test]
    fn test_tokenize_simple() {
        assert_eq!(
            tokenize("200 3 Command okay").unwrap(),
            vec!["200", "3", "Command", "okay"]
        );
    }

    #[test]
    fn test_tokenize_collapses_repeated_whitespace() {
        assert_eq!(tokenize("  a \t b  ").unwrap(), vec!["a", "b"]);
        assert!(tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_quotes_and_escapes() {
        assert_eq!(
            tokenize(r#"create "/data/my files" pa\"ss "" x"y z"w"#).unwrap(),
            vec!["create", "/data/my files", "pa\"ss", "", "xy zw"]
        );
    }

    #[test]
    fn test_tokenize_errors() {
        assert_eq!(tokenize("a \"b"), Err(TokenizeError::UnterminatedQuote));
        assert_eq!(tokenize("a b\\"), Err(TokenizeError::TrailingEscape));
    }

    #[test]
    fn test_encode_then_tokenize_recovers_arguments() {
        let original = [
            "/data/efs store",
            "  leading",
            "trailing  ",
            "quote\"inside",
            "\"",
            "\\",
            "\\\"",
            "",
            "tab\there",
            "plain",
            "ünïcödé pässwörd",
        ];
        let cmd = encode(Some(42), "efs-server", "create", &strs(&original)).unwrap();
        let tokens = tokenize(cmd.wire()).unwrap();
        assert_eq!(tokens[0], "42");
        assert_eq!(tokens[1], "efs-server");
        assert_eq!(tokens[2], "create");
        assert_eq!(&tokens[3..], &original);
    }

    #[test]
    fn test_operation_wire_names_and_args() {
        let (name, args) = Operation::ChangeStoragePassword {
            path: "/data/x".into(),
            old_password: "old".into(),
            new_password: "new".into(),
        }
        .into_args();
        assert_eq!(name, "change_passwd");
        assert_eq!(args.len(), 3);
        assert!(!args[0].is_secret());
        assert!(args[1].is_secret() && args[2].is_secret());

        let (name, args) = Operation::UnlockUserData {
            user_id: 10,
            from_init: true,
            password: "pw".into(),
        }
        .into_args();
        assert_eq!(name, "unlock_user_data");
        assert_eq!(args[0], Arg::Int(10));
        assert_eq!(args[1], Arg::Int(1));
        assert!(args[2].is_secret());
    }

    #[test]
    fn test_operation_result_kinds() {
        assert_eq!(
            Operation::StorageStat { path: "/x".into() }.result_kind(),
            ResultKind::Query
        );
        assert_eq!(
            Operation::EncryptionProgress { path: "/x".into() }.result_kind(),
            ResultKind::Query
        );
        assert_eq!(
            Operation::UserDataStat { user_id: 0 }.result_kind(),
            ResultKind::Query
        );
        assert_eq!(
            Operation::LockStorage { path: "/x".into() }.result_kind(),
            ResultKind::Status
        );
        assert_eq!(
            Operation::DecryptUserData {
                user_id: 0,
                password: "p".into()
            }
            .result_kind(),
            ResultKind::Status
        );
    }
}
