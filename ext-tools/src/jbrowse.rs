use crate::process::ExternalTool;
use anyhow::{bail, format_err, Context, Error};
use log::info;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

const JBROWSE_GUIDANCE: &str = "Install the JBrowse CLI with `npm install -g @jbrowse/cli` \
     (https://jbrowse.org/jb2/docs/quickstart_cli/#installing-the-cli-tools).";
const NPX_GUIDANCE: &str = "Serving needs Node.js; install the server with `npm install -g serve`.";

/// How the CLI brings a data file into the browser directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadMode {
    Symlink,
    InPlace,
}

impl LoadMode {
    fn as_str(self) -> &'static str {
        match self {
            LoadMode::Symlink => "symlink",
            LoadMode::InPlace => "inPlace",
        }
    }
}

/// A JBrowse 2 directory managed through the `jbrowse` CLI
#[derive(Debug)]
pub struct JBrowse {
    path: PathBuf,
    config: PathBuf,
    created: bool,
    cli: ExternalTool,
    npx: ExternalTool,
}

impl JBrowse {
    /// Browser directory at `path` (default `./jbrowse2`). Fails if `jbrowse` is not installed.
    pub fn new(path: Option<&Path>) -> Result<JBrowse, Error> {
        JBrowse::with_cli(path, "jbrowse")
    }

    /// Same as [`JBrowse::new`] with an explicit CLI executable
    pub fn with_cli(path: Option<&Path>, cli: impl Into<PathBuf>) -> Result<JBrowse, Error> {
        let cwd = std::env::current_dir()?;
        let path = match path {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => cwd.join(p),
            None => cwd.join("jbrowse2"),
        };
        let config = path.join("config.json");
        let cli = ExternalTool::new(cli, JBROWSE_GUIDANCE);
        let version = cli.check_version()?;
        info!("using JBrowse CLI {}", version);

        Ok(JBrowse {
            created: config.exists(),
            path,
            config,
            cli,
            npx: ExternalTool::new("npx", NPX_GUIDANCE),
        })
    }

    /// Browser directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Browser config file
    pub fn config(&self) -> &Path {
        &self.config
    }

    /// true once the browser has a config
    pub fn is_created(&self) -> bool {
        self.created
    }

    fn load_mode(&self, file: &Path) -> LoadMode {
        match file.file_name() {
            Some(name) if self.path.join(name).exists() => LoadMode::InPlace,
            _ => LoadMode::Symlink,
        }
    }

    fn add(&self, subcommand: &str, file: &Path, name: Option<&str>) -> Result<(), Error> {
        let name = match name {
            Some(n) => n.to_string(),
            None => file
                .file_stem()
                .ok_or_else(|| format_err!("{} has no file name", file.display()))?
                .to_string_lossy()
                .into_owned(),
        };
        let args: Vec<OsString> = vec![
            subcommand.into(),
            file.into(),
            "--name".into(),
            name.into(),
            "--load".into(),
            self.load_mode(file).as_str().into(),
            "--target".into(),
            self.config.clone().into(),
        ];
        self.cli.run(&args, Some(&self.path))?;
        Ok(())
    }

    /// Add a genome assembly from a FASTA file. `name` defaults to the file stem.
    ///
    /// Files already inside the browser directory are loaded in place, anything else is
    /// symlinked.
    pub fn create_assembly(&self, fasta: &Path, name: Option<&str>) -> Result<(), Error> {
        self.add("add-assembly", fasta, name)
    }

    /// Add an annotation track. Naming and loading follow [`JBrowse::create_assembly`].
    pub fn add_track(&self, track: &Path, name: Option<&str>) -> Result<(), Error> {
        self.add("add-track", track, name)
    }

    /// Build the gene name search index. Skipped if `trix/` already exists.
    pub fn build_text_index(&self) -> Result<(), Error> {
        let trix = self.path.join("trix");
        if trix.exists() {
            info!("{} already exists. Skipping.", trix.display());
            return Ok(());
        }
        let args: Vec<OsString> = vec!["text-index".into(), "--target".into(), self.config.clone().into()];
        self.cli.run(&args, Some(&self.path))?;
        Ok(())
    }

    /// Create the browser with an assembly, a gene track, an optional transcript track and the
    /// text index. Does nothing if the config already exists.
    pub fn create(&mut self, fasta: &Path, gene_track: &Path, transcript_track: Option<&Path>) -> Result<(), Error> {
        if self.config.exists() {
            info!("{} already exists. Skipping.", self.config.display());
            self.created = true;
            return Ok(());
        }

        fs::create_dir_all(&self.path).with_context(|| self.path.display().to_string())?;
        let args: Vec<OsString> = vec!["create".into(), self.path.clone().into()];
        self.cli.run(&args, None)?;

        self.create_assembly(fasta, None)?;
        self.add_track(gene_track, None)?;
        if let Some(transcripts) = transcript_track {
            self.add_track(transcripts, None)?;
        }
        self.build_text_index()?;

        self.created = true;
        Ok(())
    }

    /// Serve the browser directory on `port` with `npx serve`. Blocks until the server exits.
    pub fn serve(&self, port: u16) -> Result<(), Error> {
        if !self.created {
            bail!("JBrowse at {} is not created yet, run create() first", self.path.display());
        }
        let port = port.to_string();
        self.npx.run(&["serve", "-S", "--port", port.as_str(), "."], Some(&self.path))?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use crate::process::MissingDependency;
    use crate::test_util::{fake_tool, logged_calls};

    /// Fake `jbrowse` that logs its arguments and writes a config on `create`
    fn fake_jbrowse(dir: &Path) -> (PathBuf, PathBuf) {
        let log = dir.join("calls.log");
        let body = format!(
            "echo \"$@\" >> {log}\n\
             if [ \"$1\" = create ]; then mkdir -p \"$2\" && echo '{{}}' > \"$2/config.json\"; fi\n",
            log = log.display()
        );
        (fake_tool(dir, "jbrowse", &body), log)
    }

    #[test]
    fn test_missing_cli() {
        let dir = tempfile::tempdir().unwrap();
        let err = JBrowse::with_cli(Some(dir.path()), dir.path().join("no-jbrowse")).unwrap_err();
        assert!(err.downcast_ref::<MissingDependency>().is_some());
        assert!(err.to_string().contains("@jbrowse/cli"));
    }

    #[test]
    fn test_create() {
        let dir = tempfile::tempdir().unwrap();
        let (cli, log) = fake_jbrowse(dir.path());
        let browser_dir = dir.path().join("browser");
        let fasta = dir.path().join("mm10.fa.gz");
        let genes = dir.path().join("genes.gff3.gz");

        let mut jb = JBrowse::with_cli(Some(&browser_dir), &cli).unwrap();
        assert!(!jb.is_created());
        assert_eq!(jb.path(), browser_dir);
        assert_eq!(jb.config(), browser_dir.join("config.json"));
        assert!(jb.serve(3000).is_err());

        jb.create(&fasta, &genes, None).unwrap();
        assert!(jb.is_created());

        let calls = logged_calls(&log);
        let config = browser_dir.join("config.json");
        assert_eq!(
            calls,
            vec![
                "--version".to_string(),
                format!("create {}", browser_dir.display()),
                format!(
                    "add-assembly {} --name mm10.fa --load symlink --target {}",
                    fasta.display(),
                    config.display()
                ),
                format!(
                    "add-track {} --name genes.gff3 --load symlink --target {}",
                    genes.display(),
                    config.display()
                ),
                format!("text-index --target {}", config.display()),
            ]
        );

        // config exists now, nothing is run again
        jb.create(&fasta, &genes, None).unwrap();
        assert_eq!(logged_calls(&log).len(), calls.len());
    }

    #[test]
    fn test_in_place_and_text_index_skip() {
        let dir = tempfile::tempdir().unwrap();
        let (cli, log) = fake_jbrowse(dir.path());
        let browser_dir = dir.path().join("browser");
        fs::create_dir_all(browser_dir.join("trix")).unwrap();
        fs::write(browser_dir.join("config.json"), "{}").unwrap();
        fs::write(browser_dir.join("local.bw"), "").unwrap();

        let jb = JBrowse::with_cli(Some(&browser_dir), &cli).unwrap();
        assert!(jb.is_created());
        jb.add_track(&browser_dir.join("local.bw"), Some("signal")).unwrap();
        jb.build_text_index().unwrap();

        let calls = logged_calls(&log);
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("--name signal --load inPlace"));
    }

    #[test]
    fn test_failing_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = fake_tool(
            dir.path(),
            "jbrowse",
            "if [ \"$1\" = --version ]; then exit 0; fi\necho 'bad track' >&2\nexit 1\n",
        );
        let jb = JBrowse::with_cli(Some(dir.path()), &cli).unwrap();
        let err = jb.add_track(Path::new("/data/x.bed"), None).unwrap_err();
        assert!(err.to_string().contains("bad track"));
    }
}
