// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and routes each subcommand to its
// use case in Layer 2. Printing happens here and nowhere else.

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, GenerateArgs, TrainArgs};

use crate::application::forward_use_case::{ForwardConfig, ForwardReport, ForwardUseCase};

#[derive(Parser, Debug)]
#[command(
    name = "florence2",
    version,
    about = "Florence-2 style vision-language model: DaViT backbone + BART on Burn."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Demo(args)     => run_forward(args.into()),
            Commands::Forward(args)  => run_forward(args.into()),
            Commands::Generate(args) => run_generate(args),
            Commands::Train(args)    => run_train(args),
        }
    }
}

fn run_forward(config: ForwardConfig) -> Result<()> {
    let report = ForwardUseCase::new(config).execute()?;
    print_report(&report);
    Ok(())
}

fn print_report(r: &ForwardReport) {
    println!("input  {:?}", r.input_shape);
    println!("text   {:?}", r.text_shape);
    println!("output logits {:?}", r.logits_shape);
    println!("output encoder_last_hidden_state {:?}", r.encoder_shape);
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    use crate::application::generate_use_case::GenerateUseCase;
    use crate::domain::traits::Captioner;

    let device = Default::default();
    let use_case: GenerateUseCase = match &args.checkpoint_dir {
        Some(dir) => GenerateUseCase::from_checkpoint(dir, args.max_new_tokens, &device)?,
        None      => GenerateUseCase::from_config(args.config.as_deref(), args.max_new_tokens, &device)?,
    };

    let caption = use_case.caption(&args.image, &args.prompt)?;
    println!("\nCaption: {}", caption);
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Fine-tuning on manifest: {}", args.manifest);
    let history = TrainUseCase::new(args.into()).execute()?;

    if let Some(last) = history.last() {
        println!(
            "Training complete after {} epochs (val_loss={:.4}).",
            last.epoch, last.val_loss
        );
    }
    Ok(())
}
