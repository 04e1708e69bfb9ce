//! Connection loop of `dbank-serve`.

use std::{
    io::{self, BufRead, Read, Write},
    path::Path,
};

use tracing::{error, warn};

use crate::{
    rpc::{self, Response, RpcError},
    service::StakingService,
};

/// Longest request line accepted, newline included.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

fn write_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, response)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Answers requests line by line until the peer closes the stream.
///
/// With `state` set, the bank is written there after every call that changed
/// it. A line longer than [`MAX_LINE_BYTES`] gets a `bad_request` reply and
/// ends the connection.
pub fn serve_connection<R, W>(
    mut reader: R,
    mut writer: W,
    service: &StakingService,
    state: Option<&Path>,
) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = (&mut reader).take(MAX_LINE_BYTES + 1).read_line(&mut line)?;
        if read == 0 {
            return Ok(());
        }
        if read as u64 > MAX_LINE_BYTES {
            warn!(limit = MAX_LINE_BYTES, "request line too long");
            let err = RpcError::bad_request(format!("request exceeds {MAX_LINE_BYTES} bytes"));
            return write_response(&mut writer, &Response::from_result(Err(err)));
        }
        let request = line.trim();
        if request.is_empty() {
            continue;
        }

        let (response, mutated) = rpc::dispatch_line(service, request);
        if let (true, Some(path)) = (mutated, state) {
            // The call already ran in memory; a failed write does not undo it.
            if let Err(err) = service.persist(path) {
                error!(%err, path = %path.display(), "cannot persist state");
            }
        }
        write_response(&mut writer, &response)?;
    }
}
