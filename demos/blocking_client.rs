//! Talking to a CoAP server without driving the event loop by hand: bind
//! a [`coap_endpoint::blocking::Client`], send a GET, block for the reply.

use std::time::Duration;

use coap_endpoint::blocking::Client;
use coap_endpoint::msg::code::method;
use coap_endpoint::msg::{Id, Message, Token, Type};

fn main() {
  simple_logger::init().unwrap();

  let target = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:5683".into());
  let addr = target.parse().expect("a socket address, e.g. 127.0.0.1:5683");

  let mut client = Client::bind("0.0.0.0:0").expect("bind client socket");

  let mut req = Message::new(Type::Con, method::GET, Id(0), Token::EMPTY);
  req.set_path("hello");

  match client.send(addr, req, true, Duration::from_secs(5)) {
    | Ok(Some(resp)) => println!("got response: {}", String::from_utf8_lossy(&resp.payload)),
    | Ok(None) => eprintln!("timed out waiting for a response"),
    | Err(e) => eprintln!("request failed: {}", e),
  }
}
