//! The command-line surface: one command per line, arguments separated by whitespace.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use log::info;
use thiserror::Error;

use crate::config::Limits;
use crate::error::FsError;
use crate::simfs::SimFs;
use crate::storage::ImageFile;

pub const HELP: &str = "\
mkfs                        format the mounted file system
mount                       load the image, creating it if missing
unmount                     store the image and unmount
clear                       delete the image and unmount
create <path>               create an empty file
mkdir <path>                create a directory and any missing parents
rmdir <path>                remove an empty directory
cd <path>                   change the current directory
pwd                         print the current directory
symlink <target> <path>     create a symbolic link
open <path>                 open a file, printing its fd
close <fd>                  close an fd
read <fd> <offset> <size>   read units from an open file
write <fd> <offset> <size>  mark units of an open file as written
truncate <path> <size>      resize a file
link <path> <name>          add a name for a file in the same directory
unlink <path>               remove a name
fstat <id>                  describe a descriptor
ls                          list the current directory
df                          show free blocks and descriptors
help                        show this message
exit                        store the image and quit";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}, try `help`")]
    UnknownCommand(String),
    #[error("{command}: missing argument <{argument}>")]
    MissingArgument {
        command: String,
        argument: &'static str,
    },
    #[error("{0:?} is not a number")]
    NotANumber(String),
    #[error("{0}: too many arguments")]
    TooManyArguments(String),
}

/// A parsed command line.
///
/// Numbers are kept signed so that a negative value parses and gets rejected by the operation
/// that receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mkfs,
    Mount,
    Unmount,
    Clear,
    Create { path: String },
    Mkdir { path: String },
    Rmdir { path: String },
    Cd { path: String },
    Pwd,
    Symlink { target: String, path: String },
    Open { path: String },
    Close { fd: i64 },
    Read { fd: i64, offset: i64, size: i64 },
    Write { fd: i64, offset: i64, size: i64 },
    Truncate { path: String, size: i64 },
    Link { path: String, new_name: String },
    Unlink { path: String },
    Fstat { id: i64 },
    Ls,
    Df,
    Help,
    Exit,
}

impl Command {
    /// Whether a successful run changes the stored state.
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Command::Mount
                | Command::Unmount
                | Command::Clear
                | Command::Pwd
                | Command::Read { .. }
                | Command::Fstat { .. }
                | Command::Ls
                | Command::Df
                | Command::Help
                | Command::Exit
        )
    }
}

/// Hands out the arguments of one command line in order.
struct Arguments<'a> {
    command: &'a str,
    rest: std::str::SplitWhitespace<'a>,
}

impl<'a> Arguments<'a> {
    fn text(&mut self, argument: &'static str) -> Result<String, ParseError> {
        self.rest
            .next()
            .map(str::to_owned)
            .ok_or_else(|| ParseError::MissingArgument {
                command: self.command.to_owned(),
                argument,
            })
    }

    fn number(&mut self, argument: &'static str) -> Result<i64, ParseError> {
        let text = self.text(argument)?;
        text.parse().map_err(|_| ParseError::NotANumber(text))
    }

    fn finish(mut self) -> Result<(), ParseError> {
        match self.rest.next() {
            Some(_) => Err(ParseError::TooManyArguments(self.command.to_owned())),
            None => Ok(()),
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut rest = line.split_whitespace();
        let command = rest.next().ok_or(ParseError::Empty)?;
        let mut args = Arguments { command, rest };

        let parsed = match command {
            "mkfs" => Command::Mkfs,
            "mount" => Command::Mount,
            "unmount" => Command::Unmount,
            "clear" => Command::Clear,
            "create" => Command::Create {
                path: args.text("path")?,
            },
            "mkdir" => Command::Mkdir {
                path: args.text("path")?,
            },
            "rmdir" => Command::Rmdir {
                path: args.text("path")?,
            },
            "cd" => Command::Cd {
                path: args.text("path")?,
            },
            "pwd" => Command::Pwd,
            "symlink" => Command::Symlink {
                target: args.text("target")?,
                path: args.text("path")?,
            },
            "open" => Command::Open {
                path: args.text("path")?,
            },
            "close" => Command::Close {
                fd: args.number("fd")?,
            },
            "read" => Command::Read {
                fd: args.number("fd")?,
                offset: args.number("offset")?,
                size: args.number("size")?,
            },
            "write" => Command::Write {
                fd: args.number("fd")?,
                offset: args.number("offset")?,
                size: args.number("size")?,
            },
            "truncate" => Command::Truncate {
                path: args.text("path")?,
                size: args.number("size")?,
            },
            "link" => Command::Link {
                path: args.text("path")?,
                new_name: args.text("name")?,
            },
            "unlink" => Command::Unlink {
                path: args.text("path")?,
            },
            "fstat" => Command::Fstat {
                id: args.number("id")?,
            },
            "ls" => Command::Ls,
            "df" => Command::Df,
            "help" => Command::Help,
            "exit" => Command::Exit,
            other => return Err(ParseError::UnknownCommand(other.to_owned())),
        };

        args.finish()?;

        Ok(parsed)
    }
}

/// The outcome of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Text(String),
    Exit,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Done => write!(f, "ok"),
            Reply::Text(text) => write!(f, "{text}"),
            Reply::Exit => write!(f, "bye"),
        }
    }
}

/// A file system that is either mounted from its image or not.
pub struct Session {
    image: ImageFile,
    limits: Limits,
    fs: Option<SimFs>,
}

impl Session {
    /// An unmounted session. `limits` apply only when the image has to be created.
    pub fn new(image: ImageFile, limits: Limits) -> Self {
        Session {
            image,
            limits,
            fs: None,
        }
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.fs.is_some()
    }

    pub fn execute(&mut self, command: Command) -> Result<Reply> {
        let mutates = command.mutates();

        let reply = match command {
            Command::Mount => self.mount()?,
            Command::Unmount => self.unmount()?,
            Command::Clear => self.clear()?,
            Command::Help => Reply::Text(HELP.to_owned()),
            Command::Exit => {
                self.finish()?;
                Reply::Exit
            }
            Command::Mkfs => {
                self.fs()?.format();
                Reply::Text("formatted".to_owned())
            }
            Command::Create { path } => {
                let id = self.fs()?.create_file(&path)?;
                Reply::Text(format!("descriptor {id}"))
            }
            Command::Mkdir { path } => {
                let id = self.fs()?.create_directory(&path)?;
                Reply::Text(format!("descriptor {id}"))
            }
            Command::Rmdir { path } => {
                self.fs()?.remove_directory(&path)?;
                Reply::Done
            }
            Command::Cd { path } => {
                let fs = self.fs()?;
                fs.change_directory(&path)?;
                Reply::Text(fs.current_path())
            }
            Command::Pwd => Reply::Text(self.fs()?.current_path()),
            Command::Symlink { target, path } => {
                let id = self.fs()?.create_symlink(&target, &path)?;
                Reply::Text(format!("descriptor {id}"))
            }
            Command::Open { path } => {
                let fd = self.fs()?.open(&path)?;
                Reply::Text(format!("fd {fd}"))
            }
            Command::Close { fd } => {
                self.fs()?.close(non_negative(fd, "fd")?)?;
                Reply::Done
            }
            Command::Read { fd, offset, size } => {
                let data = self.fs()?.read(
                    non_negative(fd, "fd")?,
                    non_negative(offset, "offset")?,
                    non_negative(size, "size")?,
                )?;
                Reply::Text(String::from_utf8_lossy(&data).into_owned())
            }
            Command::Write { fd, offset, size } => {
                self.fs()?.write(
                    non_negative(fd, "fd")?,
                    non_negative(offset, "offset")?,
                    non_negative(size, "size")?,
                )?;
                Reply::Done
            }
            Command::Truncate { path, size } => {
                self.fs()?.truncate(&path, non_negative(size, "size")?)?;
                Reply::Done
            }
            Command::Link { path, new_name } => {
                self.fs()?.link(&path, &new_name)?;
                Reply::Done
            }
            Command::Unlink { path } => {
                self.fs()?.unlink(&path)?;
                Reply::Done
            }
            Command::Fstat { id } => {
                let stat = self.fs()?.stat(non_negative(id, "id")?)?;
                Reply::Text(stat.to_string())
            }
            Command::Ls => {
                let links = self.fs()?.list_links()?;
                if links.is_empty() {
                    Reply::Done
                } else {
                    let lines = links.iter().map(ToString::to_string).collect::<Vec<_>>();
                    Reply::Text(lines.join("\n"))
                }
            }
            Command::Df => Reply::Text(self.fs()?.usage().to_string()),
        };

        if mutates {
            self.store()
                .context("operation applied, but storing the image failed")?;
        }

        Ok(reply)
    }

    /// Stores the image and unmounts, if mounted.
    pub fn finish(&mut self) -> Result<()> {
        self.store()?;

        if self.fs.take().is_some() {
            info!("unmounted {}", self.image.path().display());
        }

        Ok(())
    }

    fn mount(&mut self) -> Result<Reply> {
        if self.is_mounted() {
            bail!("already mounted");
        }

        self.fs = Some(self.image.load(&self.limits)?);
        info!("mounted {}", self.image.path().display());

        Ok(Reply::Done)
    }

    fn unmount(&mut self) -> Result<Reply> {
        if !self.is_mounted() {
            bail!("not mounted");
        }

        self.finish()?;

        Ok(Reply::Done)
    }

    fn clear(&mut self) -> Result<Reply> {
        self.fs = None;

        let removed = self.image.clear()?;
        let reply = if removed {
            format!("removed {}", self.image.path().display())
        } else {
            format!("no image at {}", self.image.path().display())
        };

        Ok(Reply::Text(reply))
    }

    fn fs(&mut self) -> Result<&mut SimFs> {
        self.fs.as_mut().context("not mounted")
    }

    fn store(&self) -> Result<()> {
        if let Some(fs) = &self.fs {
            self.image.store(fs)?;
        }

        Ok(())
    }
}

fn non_negative(value: i64, argument: &str) -> Result<usize, FsError> {
    usize::try_from(value)
        .map_err(|_| FsError::InvalidArgument(format!("{argument} must not be negative: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parse {
        use super::*;

        #[test]
        fn test_commands() {
            assert_eq!("mkfs".parse::<Command>(), Ok(Command::Mkfs));
            assert_eq!("  ls  ".parse::<Command>(), Ok(Command::Ls));
            assert_eq!(
                "read 0 2 5".parse::<Command>(),
                Ok(Command::Read {
                    fd: 0,
                    offset: 2,
                    size: 5
                })
            );
            assert_eq!(
                "symlink a/b s".parse::<Command>(),
                Ok(Command::Symlink {
                    target: "a/b".to_owned(),
                    path: "s".to_owned()
                })
            );
            assert_eq!(
                "truncate test -3".parse::<Command>(),
                Ok(Command::Truncate {
                    path: "test".to_owned(),
                    size: -3
                })
            );
        }

        #[test]
        fn test_errors() {
            assert_eq!("".parse::<Command>(), Err(ParseError::Empty));
            assert_eq!(
                "format".parse::<Command>(),
                Err(ParseError::UnknownCommand("format".to_owned()))
            );
            assert_eq!(
                "read 0 1".parse::<Command>(),
                Err(ParseError::MissingArgument {
                    command: "read".to_owned(),
                    argument: "size"
                })
            );
            assert_eq!(
                "close one".parse::<Command>(),
                Err(ParseError::NotANumber("one".to_owned()))
            );
            assert_eq!(
                "ls -l".parse::<Command>(),
                Err(ParseError::TooManyArguments("ls".to_owned()))
            );
        }
    }

    mod session {
        use std::env;
        use std::process;

        use super::*;

        fn session(name: &str) -> Session {
            let path = env::temp_dir().join(format!("simfs-shell-{}-{name}", process::id()));
            let image = ImageFile::new(path);
            image.clear().unwrap();

            Session::new(image, Limits::default())
        }

        fn run(session: &mut Session, line: &str) -> Result<Reply> {
            session.execute(line.parse()?)
        }

        fn text(session: &mut Session, line: &str) -> String {
            run(session, line).unwrap().to_string()
        }

        #[test]
        fn test_requires_mount() {
            let mut session = session("unmounted");

            assert!(run(&mut session, "create test").is_err());
            assert!(run(&mut session, "ls").is_err());
            assert!(run(&mut session, "unmount").is_err());
            assert!(run(&mut session, "help").is_ok());

            run(&mut session, "mount").unwrap();
            assert!(run(&mut session, "mount").is_err());
            assert!(run(&mut session, "create test").is_ok());

            run(&mut session, "clear").unwrap();
        }

        #[test]
        fn test_file_operations() {
            let mut session = session("files");
            run(&mut session, "mount").unwrap();

            assert_eq!(text(&mut session, "create test"), "descriptor 0");
            assert_eq!(text(&mut session, "open test"), "fd 0");
            assert_eq!(text(&mut session, "read 0 0 8"), "00000000");
            run(&mut session, "write 0 3 3").unwrap();
            assert_eq!(text(&mut session, "read 0 2 5"), "01110");
            assert_eq!(text(&mut session, "ls"), "test : 0 (file)");
            assert_eq!(
                text(&mut session, "fstat 0"),
                "descriptor 0: file size=8 blocks=1 links=1 open=1"
            );

            run(&mut session, "clear").unwrap();
        }

        #[test]
        fn test_negative_numbers() {
            let mut session = session("negative");
            run(&mut session, "mount").unwrap();
            run(&mut session, "create test").unwrap();

            let err = run(&mut session, "truncate test -1").unwrap_err();
            assert!(matches!(
                err.downcast_ref::<FsError>(),
                Some(FsError::InvalidArgument(_))
            ));

            run(&mut session, "clear").unwrap();
        }

        #[test]
        fn test_directories() {
            let mut session = session("directories");
            run(&mut session, "mount").unwrap();

            run(&mut session, "mkdir a/b").unwrap();
            assert_eq!(text(&mut session, "cd a"), "~/a");
            assert_eq!(text(&mut session, "pwd"), "~/a");
            assert_eq!(text(&mut session, "ls"), "b : 1 (directory)");
            run(&mut session, "rmdir b").unwrap();
            assert_eq!(run(&mut session, "ls").unwrap(), Reply::Done);

            run(&mut session, "clear").unwrap();
        }

        #[test]
        fn test_state_survives_remount() {
            let mut session = session("remount");
            run(&mut session, "mount").unwrap();
            run(&mut session, "create test").unwrap();
            run(&mut session, "truncate test 20").unwrap();
            run(&mut session, "unmount").unwrap();
            assert!(!session.is_mounted());

            run(&mut session, "mount").unwrap();
            assert_eq!(
                text(&mut session, "fstat 0"),
                "descriptor 0: file size=24 blocks=3 links=1 open=0"
            );

            run(&mut session, "mkfs").unwrap();
            assert_eq!(run(&mut session, "exit").unwrap(), Reply::Exit);
            assert!(!session.is_mounted());

            run(&mut session, "mount").unwrap();
            assert!(run(&mut session, "fstat 0").is_err());

            run(&mut session, "clear").unwrap();
        }

        #[test]
        fn test_failed_store_after_mutation() {
            let mut session = session("readonly");
            run(&mut session, "mount").unwrap();

            // a directory where the image file was makes every store fail
            let path = session.image.path().to_path_buf();
            std::fs::remove_file(&path).unwrap();
            std::fs::create_dir(&path).unwrap();

            let err = run(&mut session, "create test").unwrap_err();
            assert!(format!("{err:#}").contains("operation applied"));
            assert_eq!(text(&mut session, "ls"), "test : 0 (file)");

            session.fs = None;
            std::fs::remove_dir(&path).unwrap();
        }

        #[test]
        fn test_clear() {
            let mut session = session("clear");
            run(&mut session, "mount").unwrap();

            assert!(text(&mut session, "clear").starts_with("removed"));
            assert!(!session.is_mounted());
            assert!(text(&mut session, "clear").starts_with("no image"));
        }
    }
}
