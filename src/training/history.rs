use serde::{Deserialize, Serialize};

/// Per-epoch loss history recorded during training.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<usize>,
    pub train_losses: Vec<f64>,
    /// Parallel to `train_losses` when a validation holdout exists,
    /// otherwise empty.
    pub val_losses: Vec<f64>,
}

impl TrainingHistory {
    pub fn record(&mut self, epoch: usize, train_loss: f64, val_loss: Option<f64>) {
        self.epochs.push(epoch);
        self.train_losses.push(train_loss);
        if let Some(val_loss) = val_loss {
            self.val_losses.push(val_loss);
        }
    }

    pub fn final_train_loss(&self) -> Option<f64> {
        self.train_losses.last().copied()
    }

    pub fn final_val_loss(&self) -> Option<f64> {
        self.val_losses.last().copied()
    }
}
