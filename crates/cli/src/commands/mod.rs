mod check;
mod explain;
mod simulate;
mod validate;

pub(crate) use check::cmd_check;
pub(crate) use explain::cmd_explain;
pub(crate) use simulate::cmd_simulate;
pub(crate) use validate::cmd_validate;
