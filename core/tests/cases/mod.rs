mod cancellation;
mod lookahead;
