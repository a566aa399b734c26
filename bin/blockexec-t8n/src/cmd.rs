use clap::Parser;

/// Commands of the blockexec-t8n tool
#[derive(Parser, Debug)]
#[command(infer_subcommands = true, version)]
pub enum MainCmd {
    /// Execute a block and print the result
    T8n(crate::t8n::Cmd),
}

/// Top-level error of the tool
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Logging could not be set up
    #[error("Failed to set up logging: {0}")]
    Logging(#[source] std::io::Error),
    /// The state transition failed
    #[error("T8n error: {0}")]
    T8n(#[from] crate::t8n::T8nError),
}

impl MainCmd {
    /// Runs the selected command.
    pub fn run(&self) -> Result<(), Error> {
        match self {
            Self::T8n(cmd) => {
                cmd.log.init().map_err(Error::Logging)?;
                cmd.run()?;
                Ok(())
            }
        }
    }
}
