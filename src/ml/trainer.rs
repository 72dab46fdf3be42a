// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Fine-tunes Florence2 on caption pairs with Burn's DataLoader
// and Adam:
//
//   for each epoch:
//     train: forward_loss → backward → Adam step
//     valid: model.valid() (inner backend, dropout off) → mean loss
//     save checkpoint + append metrics row
//
// With `resume`, epochs are numbered on from the latest checkpoint.
//
// The loop is generic over the autodiff backend so it runs on
// Autodiff<Wgpu> from the CLI and Autodiff<NdArray> in tests.

use anyhow::Result;
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{CaptionBatch, CaptionBatcher},
    dataset::CaptionDataset,
};
use crate::domain::caption::CaptionPair;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{config::Florence2Config, florence2::Florence2Model, inferencer::load_pretrained};

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

pub fn run_training(
    cfg:           &TrainConfig,
    model_cfg:     &Florence2Config,
    batcher:       CaptionBatcher,
    train_dataset: CaptionDataset,
    val_dataset:   CaptionDataset,
    ckpt_manager:  &CheckpointManager,
) -> Result<Vec<EpochMetrics>> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    train_loop::<MyBackend>(cfg, model_cfg, batcher, train_dataset, val_dataset, ckpt_manager, &device)
}

pub fn train_loop<B: AutodiffBackend>(
    cfg:           &TrainConfig,
    model_cfg:     &Florence2Config,
    batcher:       CaptionBatcher,
    train_dataset: CaptionDataset,
    val_dataset:   CaptionDataset,
    ckpt_manager:  &CheckpointManager,
    device:        &B::Device,
) -> Result<Vec<EpochMetrics>> {
    // ── Build model ───────────────────────────────────────────────────────────
    // A resumed run keeps counting from the latest saved epoch
    let (mut model, done): (Florence2Model<B>, usize) = if cfg.resume && ckpt_manager.has_checkpoint() {
        let done = ckpt_manager.latest_epoch()?;
        (ckpt_manager.load_model(model_cfg.init(device)?, device)?, done)
    } else {
        (load_pretrained(model_cfg.init(device)?, model_cfg, device)?, 0)
    };
    tracing::info!(
        "Model ready: {} params, backbone width {}, d_model {}",
        model.num_params(),
        model_cfg.backbone.davit().feature_dim(),
        model_cfg.language_model.bart.d_model,
    );

    let mut optim = AdamConfig::new().with_epsilon(1e-8).init();

    // ── Data loaders ──────────────────────────────────────────────────────────
    let train_loader = DataLoaderBuilder::<B, CaptionPair, CaptionBatch<B>>::new(batcher.clone())
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .set_device(device.clone())
        .build(train_dataset);

    // Validation runs on the inner backend, no autodiff graph
    let val_loader =
        DataLoaderBuilder::<B::InnerBackend, CaptionPair, CaptionBatch<B::InnerBackend>>::new(batcher)
            .batch_size(cfg.batch_size)
            .num_workers(1)
            .set_device(device.clone())
            .build(val_dataset);

    let metrics_logger = MetricsLogger::new(ckpt_manager.dir())?;
    tracing::info!("Logging metrics to '{}'", metrics_logger.csv_path().display());
    let mut history = Vec::with_capacity(cfg.epochs);
    let mut best_val_loss = f64::INFINITY;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    let last_epoch = done + cfg.epochs;
    for epoch in done + 1..=last_epoch {
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;

        for batch in train_loader.iter() {
            let (loss, _) = model.forward_loss(batch.images, batch.prompts, batch.targets)?;

            train_loss_sum += loss.clone().into_scalar().elem::<f64>();
            train_batches  += 1;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.lr, model, grads);
        }

        let model_valid = model.valid();
        let mut val_loss_sum = 0.0f64;
        let mut val_batches  = 0usize;

        for batch in val_loader.iter() {
            let (loss, _) = model_valid.forward_loss(batch.images, batch.prompts, batch.targets)?;
            val_loss_sum += loss.into_scalar().elem::<f64>();
            val_batches  += 1;
        }

        let metrics = EpochMetrics::new(
            epoch,
            mean(train_loss_sum, train_batches),
            mean(val_loss_sum, val_batches),
        );

        tracing::info!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | ppl={:.2}",
            epoch,
            last_epoch,
            metrics.train_loss,
            metrics.val_loss,
            metrics.perplexity(),
        );

        if metrics.is_improvement(best_val_loss) {
            tracing::info!("New best validation loss at epoch {}", epoch);
            best_val_loss = metrics.val_loss;
        }

        metrics_logger.log(&metrics)?;
        ckpt_manager.save_model(&model, epoch)?;
        history.push(metrics);
    }

    tracing::info!("Training complete!");
    Ok(history)
}

fn mean(sum: f64, count: usize) -> f64 {
    if count > 0 { sum / count as f64 } else { f64::NAN }
}
