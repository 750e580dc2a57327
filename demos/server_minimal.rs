//! Smallest possible client/server roundtrip: start a server, GET it from
//! a client bound in the same process.

use coap_endpoint::config::Config;
use coap_endpoint::io_driver::PosixDriver;
use coap_endpoint::msg::code::method;
use coap_endpoint::msg::{Id, Message, Token, Type};
use coap_endpoint::net::Transport;
use coap_endpoint::scheduler::{Context, COAP_IO_NO_WAIT};
use coap_endpoint::server::{Method, Resource};
use coap_endpoint::time::SystemClock;

fn main() {
  simple_logger::init().unwrap();

  let mut server = Context::new(std::net::UdpSocket::bind("0.0.0.0:0").unwrap(), SystemClock::new(), PosixDriver,
                                 Config::default(), Transport::Udp);
  let mut hello = Resource::new("hello");
  hello.on(Method::Get, |req| {
         let mut resp = req.ack(coap_endpoint::msg::code::resp::CONTENT);
         resp.payload = b"world".to_vec();
         resp
       });
  server.resources.add(hello);
  let server_addr = server.local_addr().unwrap();

  let mut client = Context::new(std::net::UdpSocket::bind("0.0.0.0:0").unwrap(), SystemClock::new(), PosixDriver,
                                 Config::default(), Transport::Udp);
  client.handlers.on_response =
    Some(Box::new(|_session, msg| println!("got response: {}", String::from_utf8_lossy(&msg.payload))));

  let mut req = Message::new(Type::Con, method::GET, Id(0), Token::EMPTY);
  req.set_path("hello");
  client.send_request(server_addr, req, true).unwrap();

  server.process(COAP_IO_NO_WAIT);
  client.process(COAP_IO_NO_WAIT);
}
