use clap::CommandFactory;
use clap_complete::Shell;

pub fn cmd_completions(shell: Shell) {
    let mut cmd = crate::args::Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}
