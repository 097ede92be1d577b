use crate::position::Transaction;

/// Win/loss statistics over completed round trips.
#[derive(Debug, Default)]
pub struct TradesAnalyzer {
    total: u64,
    winning: u64,
    losing: u64,
    even: u64,
    gross_profit: f64,
    gross_loss: f64,
    max_profit: f64,
    min_profit: f64,
    net_profit: f64,
}

impl TradesAnalyzer {
    pub fn new() -> Self {
        Self {
            max_profit: f64::MIN,
            min_profit: f64::MAX,
            ..Self::default()
        }
    }

    pub fn on_transaction(&mut self, transaction: &Transaction) {
        let pnl = transaction.realized_pnl;

        self.total += 1;
        self.net_profit += pnl;
        if pnl > 0.0 {
            self.winning += 1;
            self.gross_profit += pnl;
        } else if pnl < 0.0 {
            self.losing += 1;
            self.gross_loss += pnl;
        } else {
            self.even += 1;
        }
        self.max_profit = self.max_profit.max(pnl);
        self.min_profit = self.min_profit.min(pnl);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn winning(&self) -> u64 {
        self.winning
    }

    pub fn losing(&self) -> u64 {
        self.losing
    }

    pub fn even(&self) -> u64 {
        self.even
    }

    pub fn gross_profit(&self) -> f64 {
        self.gross_profit
    }

    /// Sum of losing trades; non-positive.
    pub fn gross_loss(&self) -> f64 {
        self.gross_loss
    }

    pub fn net_profit(&self) -> f64 {
        self.net_profit
    }

    pub fn max_profit(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.max_profit }
    }

    pub fn min_profit(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.min_profit }
    }

    pub fn avg_profit(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.net_profit / self.total as f64
        }
    }

    /// Fraction of winning trades.
    pub fn percent_profitable(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.winning as f64 / self.total as f64
        }
    }

    pub fn avg_winning_trade(&self) -> f64 {
        if self.winning == 0 {
            0.0
        } else {
            self.gross_profit / self.winning as f64
        }
    }

    pub fn avg_losing_trade(&self) -> f64 {
        if self.losing == 0 {
            0.0
        } else {
            self.gross_loss / self.losing as f64
        }
    }

    /// How many currency units are won per unit lost, on average.
    pub fn ratio_avg_win_avg_loss(&self) -> f64 {
        let avg_loss = self.avg_losing_trade().abs();
        if avg_loss == 0.0 {
            0.0
        } else {
            self.avg_winning_trade() / avg_loss
        }
    }
}
