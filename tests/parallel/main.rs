mod fifo;
mod guarded;
mod handles;
mod reentrant;
mod stop;
mod stress;
mod submitters;
mod support;
