use structopt::StructOpt;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    if !legacy_mailer::run(&legacy_mailer::Opt::from_args())? {
        std::process::exit(1);
    }
    Ok(())
}
