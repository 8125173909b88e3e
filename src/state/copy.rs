//! COPY protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, CopyData, CopyDone as CopyDoneMessage, CopyInResponse, CopyOutResponse,
    ErrorResponse, RawMessage, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::{write_copy_data, write_copy_done, write_copy_fail, write_query};
use crate::protocol::types::{FormatCode, TransactionStatus};

use super::StateMachine;
use super::action::{Action, AsyncMessage};

/// Which direction the server put the connection into COPY mode for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// `COPY ... FROM STDIN` — the client sends `CopyData` frames.
    In,
    /// `COPY ... TO STDOUT` — the server sends `CopyData` frames.
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingStart,
    CopyIn,
    CopyOut,
    WaitingReady,
    Finished,
}

/// Receives `CopyData` chunks streamed by the server during `COPY ... TO STDOUT`.
pub trait CopyOutHandler {
    /// Called once, right after `CopyOutResponse` is parsed.
    fn start(&mut self, binary: bool, column_formats: &[FormatCode]) -> Result<()> {
        let _ = (binary, column_formats);
        Ok(())
    }

    /// Called for each `CopyData` frame, in order.
    fn chunk(&mut self, data: &[u8]) -> Result<()>;
}

/// A [`CopyOutHandler`] that never receives data, for driving `COPY ... FROM STDIN`
/// through the same state machine type.
#[derive(Debug, Default)]
pub struct NullCopyOutHandler;

impl CopyOutHandler for NullCopyOutHandler {
    fn chunk(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Sans-I/O state machine driving a `COPY` statement.
///
/// `COPY ... TO STDOUT` fits the normal `step()`-driven loop end to end: the
/// server pushes every `CopyData` frame on its own, so the driver just keeps
/// calling `step()` until `Action::Finished`.
///
/// `COPY ... FROM STDIN` does not: the data comes from the caller, not the
/// wire, so once `step()` reports `CopyIn` the driver stops calling `step()`
/// and instead calls [`write_chunk`](Self::write_chunk) /
/// [`finish`](Self::finish) / [`fail`](Self::fail) directly, one per chunk the
/// caller has ready, each still returning a plain `Action::Write` or
/// `Action::WriteAndReadMessage` for the driver to execute. `finish()`/`fail()`
/// hand the state machine back to the normal `step()` loop for the
/// `CommandComplete`/`ReadyForQuery` tail.
pub struct CopyStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    direction: Option<CopyDirection>,
    binary: bool,
    transaction_status: TransactionStatus,
}

impl<'a, H: CopyOutHandler> CopyStateMachine<'a, H> {
    /// Create a new COPY state machine, writing the triggering `Query` message
    /// to `buffer_set.write_buffer`.
    pub fn new(handler: &'a mut H, buffer_set: &mut BufferSet, query: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, query);

        Self {
            state: State::Initial,
            handler,
            direction: None,
            binary: false,
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Direction the server put the connection into, once `step()` has seen
    /// `CopyInResponse`/`CopyOutResponse`.
    pub fn direction(&self) -> Option<CopyDirection> {
        self.direction
    }

    /// Whether the column data is binary-formatted.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// True once the server is waiting on client-supplied `CopyData` frames.
    pub fn ready_for_chunks(&self) -> bool {
        self.state == State::CopyIn
    }

    /// Encode one `CopyData` frame into `buffer_set.write_buffer`.
    ///
    /// Only valid while [`ready_for_chunks`](Self::ready_for_chunks) is true.
    pub fn write_chunk(&mut self, buffer_set: &mut BufferSet, data: &[u8]) -> Result<Action> {
        if self.state != State::CopyIn {
            return Err(Error::Protocol("not waiting for COPY IN data".into()));
        }
        buffer_set.write_buffer.clear();
        write_copy_data(&mut buffer_set.write_buffer, data);
        Ok(Action::Write)
    }

    /// Encode `CopyDone` and transition to waiting for `CommandComplete`.
    ///
    /// After the driver performs the returned action, resume with the normal
    /// `step()` loop.
    pub fn finish(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state != State::CopyIn {
            return Err(Error::Protocol("not waiting for COPY IN data".into()));
        }
        buffer_set.write_buffer.clear();
        write_copy_done(&mut buffer_set.write_buffer);
        self.state = State::WaitingReady;
        Ok(Action::WriteAndReadMessage)
    }

    /// Encode `CopyFail`, aborting the COPY IN after a local error.
    ///
    /// After the driver performs the returned action, resume with the normal
    /// `step()` loop — the server responds with `ErrorResponse` followed by
    /// `ReadyForQuery`.
    pub fn fail(&mut self, buffer_set: &mut BufferSet, message: &str) -> Result<Action> {
        if self.state != State::CopyIn {
            return Err(Error::Protocol("not waiting for COPY IN data".into()));
        }
        buffer_set.write_buffer.clear();
        write_copy_fail(&mut buffer_set.write_buffer, message);
        self.state = State::WaitingReady;
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_async_message(&self, msg: &RawMessage<'_>) -> Result<Action> {
        match msg.type_byte {
            msg_type::NOTICE_RESPONSE => {
                let notice = crate::protocol::backend::NoticeResponse::parse(msg.payload)?;
                Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::Notice(notice.fields),
                ))
            }
            msg_type::PARAMETER_STATUS => {
                let param = crate::protocol::backend::auth::ParameterStatus::parse(msg.payload)?;
                Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::ParameterChanged {
                        name: param.name.to_string(),
                        value: param.value.to_string(),
                    },
                ))
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification =
                    crate::protocol::backend::auth::NotificationResponse::parse(msg.payload)?;
                Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::Notification {
                        pid: notification.pid,
                        channel: notification.channel.to_string(),
                        payload: notification.payload.to_string(),
                    },
                ))
            }
            _ => Err(Error::Protocol(format!(
                "Unknown async message type: '{}'",
                msg.type_byte as char
            ))),
        }
    }
}

impl<H: CopyOutHandler> StateMachine for CopyStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            self.state = State::WaitingStart;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = RawMessage::new(type_byte, &buffer_set.read_buffer);
            return self.handle_async_message(&msg);
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            self.state = State::WaitingReady;
            return Err(error.into_error());
        }

        match self.state {
            State::WaitingStart => match type_byte {
                msg_type::COPY_IN_RESPONSE => {
                    let resp = CopyInResponse::parse(&buffer_set.read_buffer)?;
                    self.binary = resp.is_binary();
                    self.direction = Some(CopyDirection::In);
                    self.state = State::CopyIn;
                    // Control returns to the driver here: no further step()
                    // calls until write_chunk()/finish()/fail() moves us on.
                    Ok(Action::Finished)
                }
                msg_type::COPY_OUT_RESPONSE => {
                    let resp = CopyOutResponse::parse(&buffer_set.read_buffer)?;
                    self.binary = resp.is_binary();
                    self.direction = Some(CopyDirection::Out);
                    self.handler.start(self.binary, &resp.column_formats)?;
                    self.state = State::CopyOut;
                    Ok(Action::ReadMessage)
                }
                _ => Err(Error::Protocol(format!(
                    "expected CopyInResponse or CopyOutResponse, got '{}'",
                    type_byte as char
                ))),
            },
            State::CopyOut => match type_byte {
                msg_type::COPY_DATA => {
                    let data = CopyData::parse(&buffer_set.read_buffer)?;
                    self.handler.chunk(data.data)?;
                    Ok(Action::ReadMessage)
                }
                msg_type::COPY_DONE => {
                    CopyDoneMessage::parse(&buffer_set.read_buffer)?;
                    Ok(Action::ReadMessage)
                }
                msg_type::COMMAND_COMPLETE => {
                    CommandComplete::parse(&buffer_set.read_buffer)?;
                    self.state = State::WaitingReady;
                    Ok(Action::ReadMessage)
                }
                _ => Err(Error::Protocol(format!(
                    "unexpected message during COPY OUT: '{}'",
                    type_byte as char
                ))),
            },
            // After finish()/fail() writes CopyDone/CopyFail directly (bypassing
            // step()), the server still answers with CommandComplete before
            // ReadyForQuery — handle both here.
            State::WaitingReady => match type_byte {
                msg_type::COMMAND_COMPLETE => {
                    CommandComplete::parse(&buffer_set.read_buffer)?;
                    Ok(Action::ReadMessage)
                }
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                    self.transaction_status = ready.transaction_status().unwrap_or_default();
                    self.state = State::Finished;
                    Ok(Action::Finished)
                }
                _ => Err(Error::Protocol(format!(
                    "expected CommandComplete or ReadyForQuery, got '{}'",
                    type_byte as char
                ))),
            },
            _ => Err(Error::Protocol(format!(
                "unexpected COPY state {:?}",
                self.state
            ))),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_in_response_hands_control_back_without_finishing() {
        // CopyInResponse, format=0 (text), 0 columns
        let payload = [0u8, 0, 0];
        let mut buffer_set = BufferSet::default();
        let mut handler = NullCopyOutHandler;
        let mut sm = CopyStateMachine::new(&mut handler, &mut buffer_set, "COPY t FROM STDIN");

        // drive past Initial
        assert!(matches!(
            sm.step(&mut buffer_set).unwrap(),
            Action::WriteAndReadMessage
        ));

        buffer_set.type_byte = msg_type::COPY_IN_RESPONSE;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.extend_from_slice(&payload);

        let action = sm.step(&mut buffer_set).unwrap();
        assert!(matches!(action, Action::Finished));
        assert_eq!(sm.direction(), Some(CopyDirection::In));
        assert!(sm.ready_for_chunks());
    }

    #[test]
    fn write_chunk_rejects_wrong_state() {
        let mut buffer_set = BufferSet::default();
        let mut handler = NullCopyOutHandler;
        let mut sm = CopyStateMachine::new(&mut handler, &mut buffer_set, "COPY t FROM STDIN");
        assert!(sm.write_chunk(&mut buffer_set, b"hi").is_err());
    }
}
